use bevy::core_pipeline::core_2d::graph::{Core2d, Node2d};
use bevy::log::{error, info, warn};
use bevy::prelude::*;
use bevy::render::extract_component::ExtractComponentPlugin;
use bevy::render::extract_resource::ExtractResourcePlugin;
use bevy::render::render_graph::{RenderGraphApp, ViewNodeRunner};
use bevy::render::render_resource::{
    BufferUsages, PipelineCache, RawBufferVec, SpecializedRenderPipelines,
};
use bevy::render::renderer::{RenderAdapter, RenderDevice, RenderQueue};
use bevy::render::view::ViewTarget;
use bevy::render::{Render, RenderApp, RenderSet};

use crate::app::FluidFrame;
use crate::config::FluidConfig;
use crate::display::FluidRenderer;
use crate::error::FluidError;
use crate::gpu::backend::{FluidJobQueue, GpuBackend, PassJob};
use crate::gpu::node::{FluidCamera, FluidNode, FluidPassLabel};
use crate::gpu::pipeline::{DisplayTarget, FluidPipelines, ProgramTable, required_keys};
use crate::gpu::textures::{GpuGrid, GridFormats};

/// Render-world owner of the GPU renderer. Construction happens lazily
/// over several frames: formats, then programs, then grids.
#[derive(Resource)]
pub struct GpuFluidState {
    formats: Option<GridFormats>,
    programs: ProgramTable,
    renderer: Option<FluidRenderer<GpuGrid>>,
    uniforms: RawBufferVec<u8>,
    next_grid_id: u32,
    warned_extra_views: bool,
    failed: Option<FluidError>,
}

impl Default for GpuFluidState {
    fn default() -> Self {
        Self {
            formats: None,
            programs: ProgramTable::default(),
            renderer: None,
            uniforms: RawBufferVec::new(BufferUsages::UNIFORM),
            next_grid_id: 0,
            warned_extra_views: false,
            failed: None,
        }
    }
}

/// Everything [`GpuFluidState::record`] needs from the render world.
struct FrameContext<'a> {
    device: &'a RenderDevice,
    queue: &'a RenderQueue,
    adapter: &'a RenderAdapter,
    cache: &'a PipelineCache,
    pipelines: &'a FluidPipelines,
    specialized: &'a mut SpecializedRenderPipelines<FluidPipelines>,
}

/// First tagged view in entity order; the others never replay the frame.
pub fn pick_view(
    views: impl IntoIterator<Item = (Entity, DisplayTarget)>,
) -> Option<((Entity, DisplayTarget), usize)> {
    let mut views: Vec<_> = views.into_iter().collect();
    views.sort_by_key(|(entity, _)| *entity);
    let count = views.len();
    views.first().map(|view| (*view, count))
}

impl GpuFluidState {
    fn record(
        &mut self,
        ctx: FrameContext<'_>,
        config: &FluidConfig,
        frame: &FluidFrame,
        display: DisplayTarget,
        jobs: &mut Vec<PassJob>,
    ) -> Result<(), FluidError> {
        let formats = match self.formats {
            Some(formats) => formats,
            None => {
                let formats = GridFormats::negotiate(ctx.adapter)?;
                self.formats = Some(formats);
                formats
            }
        };

        self.programs.queue(
            ctx.cache,
            ctx.specialized,
            ctx.pipelines,
            required_keys(&formats, display),
        );
        if !self.programs.check(ctx.cache)? {
            return Ok(()); // still compiling
        }

        let output = frame.output;
        if output.x == 0 || output.y == 0 {
            return Ok(()); // minimized
        }

        let Self {
            programs,
            renderer,
            uniforms,
            next_grid_id,
            ..
        } = self;
        let mut backend = GpuBackend::new(
            ctx.device,
            ctx.pipelines,
            programs,
            formats,
            output,
            display,
            next_grid_id,
            uniforms,
        );

        if let Some(renderer) = renderer.as_mut() {
            renderer.resize(&mut backend, output, config)?;
        } else {
            *renderer = Some(FluidRenderer::new(&mut backend, output, config)?);
            info!("fluid renderer READY at {}x{}", output.x, output.y);
        }
        if let Some(renderer) = renderer.as_mut() {
            renderer.frame(&mut backend, frame.elapsed, &frame.impulses, config)?;
        }
        backend.finish(ctx.queue, jobs);
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
pub fn prepare_fluid_frame(
    device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
    adapter: Res<RenderAdapter>,
    cache: Res<PipelineCache>,
    pipelines: Res<FluidPipelines>,
    mut specialized: ResMut<SpecializedRenderPipelines<FluidPipelines>>,
    config: Option<Res<FluidConfig>>,
    frame: Option<Res<FluidFrame>>,
    views: Query<(Entity, &ViewTarget, &Msaa), With<FluidCamera>>,
    mut state: ResMut<GpuFluidState>,
    mut queue: ResMut<FluidJobQueue>,
) {
    queue.jobs.clear();
    queue.view = None;
    let (Some(config), Some(frame)) = (config, frame) else {
        return;
    };
    if state.failed.is_some() {
        return;
    }

    let targets = views.iter().map(|(entity, target, msaa)| {
        let display = DisplayTarget {
            format: target.main_texture_format(),
            samples: msaa.samples(),
        };
        (entity, display)
    });
    // nothing would replay the passes, so the grids must not advance
    let Some(((view, display), count)) = pick_view(targets) else {
        return;
    };
    if count > 1 && !state.warned_extra_views {
        warn!("{count} cameras carry FluidCamera; only {view} shows the fluid");
        state.warned_extra_views = true;
    }

    let ctx = FrameContext {
        device: &device,
        queue: &render_queue,
        adapter: &adapter,
        cache: &cache,
        pipelines: &pipelines,
        specialized: &mut specialized,
    };
    match state.record(ctx, &config, &frame, display, &mut queue.jobs) {
        Ok(()) => queue.view = Some(view),
        Err(err) => {
            error!("fluid renderer disabled: {err}");
            // a half-recorded frame must not reach the node
            queue.jobs.clear();
            state.failed = Some(err);
        }
    }
}

/// Render-world half of the integration: extraction, per-frame recording
/// and the Core2d node that replays the recorded passes.
pub struct GpuFluidPlugin;

impl Plugin for GpuFluidPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins((
            ExtractResourcePlugin::<FluidConfig>::default(),
            ExtractResourcePlugin::<FluidFrame>::default(),
            ExtractComponentPlugin::<FluidCamera>::default(),
        ));

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };
        render_app
            .init_resource::<FluidJobQueue>()
            .init_resource::<GpuFluidState>()
            .init_resource::<SpecializedRenderPipelines<FluidPipelines>>()
            .add_systems(Render, prepare_fluid_frame.in_set(RenderSet::Prepare))
            .add_render_graph_node::<ViewNodeRunner<FluidNode>>(Core2d, FluidPassLabel)
            .add_render_graph_edges(
                Core2d,
                (Node2d::MainTransparentPass, FluidPassLabel, Node2d::EndMainPass),
            );
    }

    fn finish(&self, app: &mut App) {
        if let Some(render_app) = app.get_sub_app_mut(RenderApp) {
            render_app.init_resource::<FluidPipelines>();
        }
    }
}

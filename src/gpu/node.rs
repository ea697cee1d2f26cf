use bevy::prelude::*;
use bevy::render::extract_component::ExtractComponent;
use bevy::render::render_graph::{NodeRunError, RenderGraphContext, RenderLabel, ViewNode};
use bevy::render::render_resource::{
    LoadOp, Operations, PipelineCache, RenderPassColorAttachment, RenderPassDescriptor, StoreOp,
};
use bevy::render::renderer::RenderContext;
use bevy::render::view::ViewTarget;

use crate::gpu::backend::FluidJobQueue;
use crate::gpu::pipeline::FluidPipelines;

/// Marks the camera the fluid is presented into. The display program is
/// built for that view's format and sample count. With several tagged
/// cameras only the first one shows the fluid.
#[derive(Component, Clone, Copy, Debug, Default, ExtractComponent)]
pub struct FluidCamera;

#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub struct FluidPassLabel;

#[derive(Default)]
pub struct FluidNode;

impl ViewNode for FluidNode {
    type ViewQuery = (&'static ViewTarget, &'static FluidCamera);

    fn run(
        &self,
        graph: &mut RenderGraphContext,
        rcx: &mut RenderContext,
        (view_target, _): <Self::ViewQuery as bevy::ecs::query::QueryData>::Item<'_>,
        world: &World,
    ) -> Result<(), NodeRunError> {
        let queue = world.resource::<FluidJobQueue>();
        if queue.jobs.is_empty() || queue.view != Some(graph.view_entity()) {
            return Ok(());
        }
        let cache = world.resource::<PipelineCache>();
        let quad = &world.resource::<FluidPipelines>().quad;

        // all or nothing: replaying a prefix would leave the double buffers
        // out of step with the parity recorded during prepare
        let mut resolved = Vec::with_capacity(queue.jobs.len());
        for job in &queue.jobs {
            let Some(pipeline) = cache.get_render_pipeline(job.pipeline) else {
                return Ok(());
            };
            resolved.push(pipeline);
        }

        for (job, pipeline) in queue.jobs.iter().zip(resolved) {
            let attachment = match &job.target {
                Some(view) => RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    // every program writes every texel
                    ops: Operations {
                        load: LoadOp::Load,
                        store: StoreOp::Store,
                    },
                },
                None => view_target.get_color_attachment(),
            };

            let mut pass = rcx.begin_tracked_render_pass(RenderPassDescriptor {
                label: Some(job.kind.label()),
                color_attachments: &[Some(attachment)],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_render_pipeline(pipeline);
            pass.set_bind_group(0, &job.bind_group, &[job.uniform_offset]);
            pass.set_vertex_buffer(0, quad.slice(..));
            pass.draw(0..6, 0..1);
        }
        Ok(())
    }
}

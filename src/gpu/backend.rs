//! [`Backend`] realised on wgpu through Bevy's render world.
//!
//! Nothing is drawn here. Each pass is staged with its uniform offset,
//! sources and target; [`GpuBackend::finish`] uploads the frame's uniforms
//! as one buffer and turns the staged passes into [`PassJob`]s (pipeline
//! id, bind group, dynamic offset, target view) for the view node.

use std::num::NonZeroU64;

use bevy::log::warn;
use bevy::prelude::{Entity, Resource};
use bevy::render::render_resource::{
    BindGroup, BindGroupEntry, BindingResource, BufferBinding, CachedRenderPipelineId,
    RawBufferVec, TextureView,
};
use bevy::render::renderer::{RenderDevice, RenderQueue};
use bytemuck::Pod;
use glam::UVec2;

use crate::error::FluidError;
use crate::field::GridFormat;
use crate::gpu::ffi::{
    AdvectionUniforms, BlurUniforms, ClearUniforms, DisplayUniforms, EmptyUniforms,
    PrefilterUniforms, SplatUniforms, StencilUniforms, VorticityUniforms,
};
use crate::gpu::pipeline::{
    DisplayTarget, FluidPipelineKey, FluidPipelines, ProgramTable, UNIFORM_BINDING_SIZE,
};
use crate::gpu::textures::{GpuGrid, GridFormats};
use crate::pass::{Backend, Pass, PassKind};

/// One recorded full-screen draw. `target: None` is the camera's view target.
pub struct PassJob {
    pub kind: PassKind,
    pub pipeline: CachedRenderPipelineId,
    pub bind_group: BindGroup,
    pub uniform_offset: u32,
    pub target: Option<TextureView>,
}

/// The frame's jobs and the one view allowed to replay them.
#[derive(Resource, Default)]
pub struct FluidJobQueue {
    pub jobs: Vec<PassJob>,
    pub view: Option<Entity>,
}

struct StagedPass {
    kind: PassKind,
    pipeline: CachedRenderPipelineId,
    uniform_offset: u32,
    sources: Vec<TextureView>,
    target: Option<TextureView>,
}

/// Appends `bytes` at the next multiple of `alignment` and returns that
/// offset.
pub fn push_uniforms(arena: &mut RawBufferVec<u8>, bytes: &[u8], alignment: u32) -> u32 {
    let alignment = alignment.max(1) as usize;
    while arena.len() % alignment != 0 {
        arena.push(0);
    }
    let offset = arena.len() as u32;
    for byte in bytes {
        arena.push(*byte);
    }
    // keep the whole binding window inside the buffer
    while arena.len() < offset as usize + UNIFORM_BINDING_SIZE as usize {
        arena.push(0);
    }
    offset
}

pub struct GpuBackend<'w> {
    device: &'w RenderDevice,
    pipelines: &'w FluidPipelines,
    programs: &'w ProgramTable,
    formats: GridFormats,
    surface: UVec2,
    display: DisplayTarget,
    next_id: &'w mut u32,
    uniforms: &'w mut RawBufferVec<u8>,
    staged: Vec<StagedPass>,
}

impl<'w> GpuBackend<'w> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &'w RenderDevice,
        pipelines: &'w FluidPipelines,
        programs: &'w ProgramTable,
        formats: GridFormats,
        surface: UVec2,
        display: DisplayTarget,
        next_id: &'w mut u32,
        uniforms: &'w mut RawBufferVec<u8>,
    ) -> Self {
        uniforms.clear();
        Self {
            device,
            pipelines,
            programs,
            formats,
            surface,
            display,
            next_id,
            uniforms,
            staged: Vec::new(),
        }
    }

    /// Uploads the frame's uniforms and builds one bind group per staged
    /// pass, all pointing into the same buffer.
    pub fn finish(self, queue: &RenderQueue, jobs: &mut Vec<PassJob>) {
        let Self {
            device,
            pipelines,
            uniforms,
            staged,
            ..
        } = self;
        if staged.is_empty() {
            return;
        }
        uniforms.write_buffer(device, queue);
        let Some(buffer) = uniforms.buffer() else {
            warn!("fluid uniforms were not uploaded; frame dropped");
            return;
        };

        for pass in staged {
            let mut entries = vec![
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::Buffer(BufferBinding {
                        buffer,
                        offset: 0,
                        size: NonZeroU64::new(UNIFORM_BINDING_SIZE),
                    }),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&pipelines.sampler),
                },
            ];
            for (i, view) in pass.sources.iter().enumerate() {
                entries.push(BindGroupEntry {
                    binding: 2 + i as u32,
                    resource: BindingResource::TextureView(view),
                });
            }
            let bind_group =
                device.create_bind_group(Some(pass.kind.label()), pipelines.layout(pass.kind), &entries);

            jobs.push(PassJob {
                kind: pass.kind,
                pipeline: pass.pipeline,
                bind_group,
                uniform_offset: pass.uniform_offset,
                target: pass.target,
            });
        }
    }
}

fn bytes<T: Pod>(uniforms: T) -> Vec<u8> {
    bytemuck::bytes_of(&uniforms).to_vec()
}

/// Uniform block and source textures (in binding order) for one pass.
fn encode<'a>(pass: Pass<'a, GpuGrid>) -> (Vec<u8>, Vec<&'a GpuGrid>) {
    match pass {
        Pass::Copy(p) => (bytes(EmptyUniforms::default()), vec![p.source]),
        Pass::Clear(p) => (
            bytes(ClearUniforms {
                value: p.value,
                _pad: [0.0; 3],
            }),
            vec![p.source],
        ),
        Pass::Splat(p) => (
            bytes(SplatUniforms {
                point: p.point.to_array(),
                radius: p.radius,
                aspect_ratio: p.aspect_ratio,
                value: p.value.extend(0.0).to_array(),
            }),
            vec![p.base],
        ),
        Pass::Advection(p) => (
            bytes(AdvectionUniforms {
                texel_size: p.texel_size.to_array(),
                dt: p.dt,
                dissipation: p.dissipation,
            }),
            vec![p.velocity, p.source],
        ),
        Pass::Curl(p) => (stencil(p.texel_size), vec![p.velocity]),
        Pass::Vorticity(p) => (
            bytes(VorticityUniforms {
                texel_size: p.texel_size.to_array(),
                curl_strength: p.curl_strength,
                dt: p.dt,
            }),
            vec![p.velocity, p.curl],
        ),
        Pass::Divergence(p) => (stencil(p.texel_size), vec![p.velocity]),
        Pass::Pressure(p) => (stencil(p.texel_size), vec![p.pressure, p.divergence]),
        Pass::GradientSubtract(p) => (stencil(p.texel_size), vec![p.pressure, p.velocity]),
        Pass::BloomPrefilter(p) => (
            bytes(PrefilterUniforms {
                threshold: p.threshold,
                _pad: [0.0; 3],
            }),
            vec![p.source],
        ),
        Pass::Blur(p) => (
            bytes(BlurUniforms {
                texel_size: p.texel_size.to_array(),
                direction: p.direction.to_array(),
            }),
            vec![p.source],
        ),
        Pass::BloomCombine(p) => (bytes(EmptyUniforms::default()), vec![p.base, p.overlay]),
        Pass::Display(p) => {
            // without glow the dye is bound twice and weighted out
            let (bloom, bloom_intensity) = match p.bloom {
                Some(bloom) => (bloom, p.bloom_intensity),
                None => (p.dye, 0.0),
            };
            (
                bytes(DisplayUniforms {
                    bloom_intensity,
                    exposure: p.exposure,
                    inv_gamma: 1.0 / p.gamma,
                    _pad: 0.0,
                }),
                vec![p.dye, bloom],
            )
        }
    }
}

fn stencil(texel_size: glam::Vec2) -> Vec<u8> {
    bytes(StencilUniforms {
        texel_size: texel_size.to_array(),
        _pad: [0.0; 2],
    })
}

impl Backend for GpuBackend<'_> {
    type Grid = GpuGrid;

    fn allocate(&mut self, size: UVec2, format: GridFormat) -> Result<GpuGrid, FluidError> {
        let id = *self.next_id;
        *self.next_id = self.next_id.wrapping_add(1);
        GpuGrid::create(self.device, id, size, format, self.formats.get(format))
    }

    // wgpu releases the texture once the last view (possibly held by a
    // queued job) is dropped
    fn free(&mut self, grid: GpuGrid) {
        drop(grid);
    }

    fn run(&mut self, target: Option<&GpuGrid>, pass: Pass<'_, GpuGrid>) {
        let kind = pass.kind();
        let key = match target {
            Some(grid) => FluidPipelineKey::grid(kind, grid.texture_format()),
            None => self.display.key(),
        };
        let Some(pipeline) = self.programs.get(&key) else {
            warn!("no {} program for {:?}; pass skipped", kind.label(), key.format);
            return;
        };

        let (uniforms, sources) = encode(pass);
        debug_assert_eq!(sources.len(), kind.texture_count() as usize);
        debug_assert!(uniforms.len() as u64 <= UNIFORM_BINDING_SIZE);

        let alignment = self.device.limits().min_uniform_buffer_offset_alignment;
        let uniform_offset = push_uniforms(self.uniforms, &uniforms, alignment);

        self.staged.push(StagedPass {
            kind,
            pipeline,
            uniform_offset,
            sources: sources.iter().map(|grid| grid.view().clone()).collect(),
            target: target.map(|grid| grid.view().clone()),
        });
    }

    fn surface_size(&self) -> UVec2 {
        self.surface
    }
}

#[cfg(test)]
mod tests {
    use bevy::render::render_resource::BufferUsages;

    use super::*;

    #[test]
    fn uniforms_share_one_buffer_at_aligned_offsets() {
        let mut arena = RawBufferVec::new(BufferUsages::UNIFORM);
        let first = push_uniforms(&mut arena, &[1; 16], 256);
        let second = push_uniforms(&mut arena, &[2; 32], 256);
        let third = push_uniforms(&mut arena, &[3; 16], 256);

        assert_eq!((first, second, third), (0, 256, 512));
        assert_eq!(arena.values()[256], 2);
        assert_eq!(arena.values()[16], 0);
        // last block still has a full binding window behind it
        assert_eq!(arena.len(), 512 + UNIFORM_BINDING_SIZE as usize);
    }

    #[test]
    fn cleared_arena_starts_again_at_zero() {
        let mut arena = RawBufferVec::new(BufferUsages::UNIFORM);
        push_uniforms(&mut arena, &[7; 16], 64);
        push_uniforms(&mut arena, &[7; 16], 64);
        arena.clear();
        assert_eq!(push_uniforms(&mut arena, &[9; 16], 64), 0);
    }
}

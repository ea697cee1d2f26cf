use std::collections::HashMap;

use bevy::asset::AssetServer;
use bevy::log::{error, info};
use bevy::prelude::*;
use bevy::render::render_resource::{
    AddressMode, BindGroupLayout, BindGroupLayoutEntry, BindingType, Buffer, BufferBindingType,
    BufferInitDescriptor, BufferUsages, CachedPipelineState, CachedRenderPipelineId,
    ColorTargetState, ColorWrites, FilterMode, FragmentState, MultisampleState, PipelineCache,
    PipelineCacheError, PrimitiveState, RenderPipelineDescriptor, Sampler, SamplerBindingType,
    SamplerDescriptor, Shader, ShaderDefVal, ShaderStages, SpecializedRenderPipeline,
    SpecializedRenderPipelines,
    TextureFormat, TextureSampleType, TextureViewDimension, VertexAttribute, VertexBufferLayout,
    VertexFormat, VertexState, VertexStepMode,
};
use bevy::render::renderer::RenderDevice;

use crate::error::FluidError;
use crate::field::GridFormat;
use crate::gpu::textures::GridFormats;
use crate::pass::PassKind;

// two triangles covering clip space
const FULLSCREEN_QUAD: &[[f32; 2]] = &[
    [-1.0, -1.0],
    [1.0, -1.0],
    [1.0, 1.0],
    [-1.0, -1.0],
    [1.0, 1.0],
    [-1.0, 1.0],
];

pub const VERTEX_SHADER: &str = "shaders/fluid_vertex.wgsl";

/// Shared by every pass program: bind group layouts (one per source
/// texture count), the full-screen quad and the clamp-to-edge sampler.
#[derive(Resource)]
pub struct FluidPipelines {
    layouts: [BindGroupLayout; 2],
    vertex_shader: Handle<Shader>,
    fragment_shaders: [Handle<Shader>; 13],
    pub quad: Buffer,
    pub sampler: Sampler,
}

/// Largest uniform block any program declares (`SplatUniforms`).
pub const UNIFORM_BINDING_SIZE: u64 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FluidPipelineKey {
    pub kind: PassKind,
    pub format: TextureFormat,
    pub samples: u32,
}

impl FluidPipelineKey {
    /// Key for a pass writing an offscreen grid.
    pub fn grid(kind: PassKind, format: TextureFormat) -> Self {
        Self {
            kind,
            format,
            samples: 1,
        }
    }
}

/// Main texture format and MSAA sample count of the camera view the
/// display program draws into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayTarget {
    pub format: TextureFormat,
    pub samples: u32,
}

impl DisplayTarget {
    pub fn key(self) -> FluidPipelineKey {
        FluidPipelineKey {
            kind: PassKind::Display,
            format: self.format,
            samples: self.samples,
        }
    }
}

/// sRGB targets encode on store, so the display program pre-decodes.
pub fn fragment_shader_defs(key: &FluidPipelineKey) -> Vec<ShaderDefVal> {
    if key.kind == PassKind::Display && key.format.is_srgb() {
        vec!["SRGB_TARGET".into()]
    } else {
        vec![]
    }
}

// layout: 0 = pass uniforms, 1 = sampler, 2.. = source textures
fn grid_layout(device: &RenderDevice, textures: u32) -> BindGroupLayout {
    let mut entries = vec![
        BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                // every pass of a frame shares one buffer
                has_dynamic_offset: true,
                min_binding_size: None,
            },
            count: None,
        },
        BindGroupLayoutEntry {
            binding: 1,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Sampler(SamplerBindingType::Filtering),
            count: None,
        },
    ];
    for i in 0..textures {
        entries.push(BindGroupLayoutEntry {
            binding: 2 + i,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
                view_dimension: TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
    }
    let label = if textures == 1 {
        "fluid_one_texture_bgl"
    } else {
        "fluid_two_texture_bgl"
    };
    device.create_bind_group_layout(Some(label), &entries)
}

impl FromWorld for FluidPipelines {
    fn from_world(world: &mut World) -> Self {
        let device = world.resource::<RenderDevice>();
        let layouts = [grid_layout(device, 1), grid_layout(device, 2)];

        let quad = device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("fluid_fullscreen_quad_vb"),
            contents: bytemuck::cast_slice(FULLSCREEN_QUAD),
            usage: BufferUsages::VERTEX,
        });

        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("fluid_linear_clamp"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..Default::default()
        });

        let assets = world.resource::<AssetServer>();
        let vertex_shader = assets.load(VERTEX_SHADER);
        let fragment_shaders =
            PassKind::ALL.map(|kind| assets.load(format!("shaders/{}.wgsl", kind.label())));

        info!("fluid pipelines: layouts, quad and sampler ready");
        Self {
            layouts,
            vertex_shader,
            fragment_shaders,
            quad,
            sampler,
        }
    }
}

impl FluidPipelines {
    pub fn layout(&self, kind: PassKind) -> &BindGroupLayout {
        &self.layouts[kind.texture_count() as usize - 1]
    }
}

impl SpecializedRenderPipeline for FluidPipelines {
    type Key = FluidPipelineKey;

    fn specialize(&self, key: Self::Key) -> RenderPipelineDescriptor {
        let quad_layout = VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 2]>() as u64,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![VertexAttribute {
                format: VertexFormat::Float32x2,
                offset: 0,
                shader_location: 0,
            }],
        };

        RenderPipelineDescriptor {
            label: Some(format!("fluid_{}_pipeline", key.kind.label()).into()),
            layout: vec![self.layout(key.kind).clone()],
            vertex: VertexState {
                shader: self.vertex_shader.clone(),
                entry_point: "vs_main".into(),
                shader_defs: vec![],
                buffers: vec![quad_layout],
            },
            fragment: Some(FragmentState {
                shader: self.fragment_shaders[key.kind as usize].clone(),
                entry_point: "fs_main".into(),
                shader_defs: fragment_shader_defs(&key),
                targets: vec![Some(ColorTargetState {
                    format: key.format,
                    blend: None,
                    write_mask: ColorWrites::ALL,
                })],
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState {
                count: key.samples,
                ..Default::default()
            },
            push_constant_ranges: vec![],
            zero_initialize_workgroup_memory: false,
        }
    }
}

/// Every (program, target format) pair a frame can issue.
pub fn required_keys(formats: &GridFormats, display: DisplayTarget) -> Vec<FluidPipelineKey> {
    use GridFormat::*;

    let targets: [(PassKind, &[GridFormat]); 12] = [
        (PassKind::Copy, &[Rgba]),
        (PassKind::Clear, &[R]),
        (PassKind::Splat, &[Rg, Rgba]),
        (PassKind::Advection, &[Rg, Rgba]),
        (PassKind::Curl, &[R]),
        (PassKind::Vorticity, &[Rg]),
        (PassKind::Divergence, &[R]),
        (PassKind::Pressure, &[R]),
        (PassKind::GradientSubtract, &[Rg]),
        (PassKind::BloomPrefilter, &[Rgba]),
        (PassKind::Blur, &[Rgba]),
        (PassKind::BloomCombine, &[Rgba]),
    ];

    let mut keys: Vec<FluidPipelineKey> = Vec::new();
    for (kind, grids) in targets {
        for grid in grids {
            let key = FluidPipelineKey::grid(kind, formats.get(*grid));
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys.push(display.key());
    keys
}

/// Cached pipeline ids for the keys a frame needs.
#[derive(Debug, Default)]
pub struct ProgramTable {
    ids: HashMap<FluidPipelineKey, CachedRenderPipelineId>,
}

impl ProgramTable {
    /// Specializes the keys not queued yet. A new camera format or sample
    /// count only adds its display program.
    pub fn queue(
        &mut self,
        cache: &PipelineCache,
        specialized: &mut SpecializedRenderPipelines<FluidPipelines>,
        pipelines: &FluidPipelines,
        keys: impl IntoIterator<Item = FluidPipelineKey>,
    ) {
        let before = self.ids.len();
        for key in keys {
            self.ids
                .entry(key)
                .or_insert_with(|| specialized.specialize(cache, pipelines, key));
        }
        if self.ids.len() != before {
            info!("fluid programs QUEUED ({})", self.ids.len());
        }
    }

    pub fn get(&self, key: &FluidPipelineKey) -> Option<CachedRenderPipelineId> {
        self.ids.get(key).copied()
    }

    /// `Ok(true)` once every program compiled, `Ok(false)` while some are
    /// still in flight, `Err` as soon as one failed for good.
    pub fn check(&self, cache: &PipelineCache) -> Result<bool, FluidError> {
        let mut ready = true;
        for (key, id) in &self.ids {
            match cache.get_render_pipeline_state(*id) {
                CachedPipelineState::Ok(_) => {}
                // shaders still loading; the cache retries these
                CachedPipelineState::Err(
                    PipelineCacheError::ShaderNotLoaded(_)
                    | PipelineCacheError::ShaderImportNotYetAvailable,
                ) => ready = false,
                CachedPipelineState::Err(err) => {
                    error!("fluid program {} ERROR: {err}", key.kind.label());
                    return Err(FluidError::ProgramBuild {
                        program: key.kind.label(),
                        reason: err.to_string(),
                    });
                }
                CachedPipelineState::Queued | CachedPipelineState::Creating(_) => ready = false,
            }
        }
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats(r: TextureFormat, rg: TextureFormat) -> GridFormats {
        GridFormats {
            r,
            rg,
            rgba: TextureFormat::Rgba16Float,
        }
    }

    const LDR: DisplayTarget = DisplayTarget {
        format: TextureFormat::Rgba8UnormSrgb,
        samples: 1,
    };

    #[test]
    fn every_program_has_a_key() {
        let keys = required_keys(
            &formats(TextureFormat::R16Float, TextureFormat::Rg16Float),
            LDR,
        );
        assert_eq!(keys.len(), 15);
        for kind in PassKind::ALL {
            assert!(keys.iter().any(|k| k.kind == kind), "{kind:?} missing");
        }
        assert!(keys.contains(&FluidPipelineKey {
            kind: PassKind::Display,
            format: TextureFormat::Rgba8UnormSrgb,
            samples: 1,
        }));
    }

    #[test]
    fn fallback_formats_collapse_duplicate_keys() {
        let keys = required_keys(
            &formats(TextureFormat::Rgba16Float, TextureFormat::Rgba16Float),
            DisplayTarget {
                format: TextureFormat::Bgra8UnormSrgb,
                samples: 1,
            },
        );
        // splat and advection now target a single format each
        assert_eq!(keys.len(), 13);
        assert!(keys.iter().all(|k| k.kind == PassKind::Display
            || k.format == TextureFormat::Rgba16Float));
    }

    #[test]
    fn display_key_follows_the_camera_view() {
        let hdr_msaa = DisplayTarget {
            format: TextureFormat::Rgba16Float,
            samples: 4,
        };
        let keys = required_keys(
            &formats(TextureFormat::R16Float, TextureFormat::Rg16Float),
            hdr_msaa,
        );

        let display: Vec<_> = keys.iter().filter(|k| k.kind == PassKind::Display).collect();
        assert_eq!(display, vec![&hdr_msaa.key()]);
        assert_eq!(display[0].samples, 4);
        // grids are never multisampled
        assert!(keys.iter().all(|k| k.kind == PassKind::Display || k.samples == 1));
    }

    #[test]
    fn only_srgb_display_targets_pre_decode() {
        assert_eq!(fragment_shader_defs(&LDR.key()).len(), 1);
        let hdr = DisplayTarget {
            format: TextureFormat::Rgba16Float,
            samples: 1,
        };
        assert!(fragment_shader_defs(&hdr.key()).is_empty());
        let grid = FluidPipelineKey::grid(PassKind::Copy, TextureFormat::Rgba8UnormSrgb);
        assert!(fragment_shader_defs(&grid).is_empty());
    }
}

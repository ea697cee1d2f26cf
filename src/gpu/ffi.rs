use bytemuck::{Pod, Zeroable};

// plain arrays instead of glam so each struct matches its WGSL twin byte
// for byte; sizes are padded to 16 for the uniform address space

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct EmptyUniforms {
    pub _pad: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ClearUniforms {
    pub value: f32,
    pub _pad: [f32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SplatUniforms {
    pub point: [f32; 2],
    pub radius: f32,
    pub aspect_ratio: f32,
    pub value: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct AdvectionUniforms {
    pub texel_size: [f32; 2],
    pub dt: f32,
    pub dissipation: f32,
}

// curl, divergence, pressure and gradient subtract only need the stencil
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct StencilUniforms {
    pub texel_size: [f32; 2],
    pub _pad: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct VorticityUniforms {
    pub texel_size: [f32; 2],
    pub curl_strength: f32,
    pub dt: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PrefilterUniforms {
    pub threshold: f32,
    pub _pad: [f32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct BlurUniforms {
    pub texel_size: [f32; 2],
    pub direction: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DisplayUniforms {
    pub bloom_intensity: f32,
    pub exposure: f32,
    pub inv_gamma: f32,
    pub _pad: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_are_16_byte_multiples() {
        let sizes = [
            size_of::<EmptyUniforms>(),
            size_of::<ClearUniforms>(),
            size_of::<SplatUniforms>(),
            size_of::<AdvectionUniforms>(),
            size_of::<StencilUniforms>(),
            size_of::<VorticityUniforms>(),
            size_of::<PrefilterUniforms>(),
            size_of::<BlurUniforms>(),
            size_of::<DisplayUniforms>(),
        ];
        assert!(sizes.iter().all(|s| s % 16 == 0), "{sizes:?}");
        assert_eq!(size_of::<SplatUniforms>(), 32);
    }
}

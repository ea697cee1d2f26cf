//! The single primitive every computation goes through: a full-grid pass
//! writing one target from a statically typed parameter set.

use glam::{UVec2, Vec2, Vec3};

use crate::error::FluidError;
use crate::field::{GridFormat, GridHandle};

/// Where grids live and how passes over them are executed.
///
/// `run` evaluates the pass program once per output sample of `target`
/// (or of the output surface when `target` is `None`). Samples never see
/// each other's results within one pass.
pub trait Backend {
    type Grid: GridHandle;

    fn allocate(&mut self, size: UVec2, format: GridFormat) -> Result<Self::Grid, FluidError>;

    fn free(&mut self, grid: Self::Grid);

    fn run(&mut self, target: Option<&Self::Grid>, pass: Pass<'_, Self::Grid>);

    fn surface_size(&self) -> UVec2;

    /// Writes `source` into `target` verbatim (resampled if sizes differ).
    fn copy(&mut self, target: &Self::Grid, source: &Self::Grid) {
        self.run(Some(target), Pass::Copy(CopyParams { source }));
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CopyParams<'a, G> {
    pub source: &'a G,
}

/// `value * source`, used to decay the retained pressure.
#[derive(Debug, Clone, Copy)]
pub struct ClearParams<'a, G> {
    pub source: &'a G,
    pub value: f32,
}

/// Additive Gaussian impulse: `base + exp(-|p|² / radius) * value`.
#[derive(Debug, Clone, Copy)]
pub struct SplatParams<'a, G> {
    pub base: &'a G,
    pub point: Vec2,
    pub value: Vec3,
    pub radius: f32,
    /// width / height of the target, stretches `p.x` so splats stay round
    pub aspect_ratio: f32,
}

/// Semi-Lagrangian transport of `source` along `velocity`.
#[derive(Debug, Clone, Copy)]
pub struct AdvectionParams<'a, G> {
    pub velocity: &'a G,
    pub source: &'a G,
    pub texel_size: Vec2,
    pub dt: f32,
    pub dissipation: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct CurlParams<'a, G> {
    pub velocity: &'a G,
    pub texel_size: Vec2,
}

#[derive(Debug, Clone, Copy)]
pub struct VorticityParams<'a, G> {
    pub velocity: &'a G,
    pub curl: &'a G,
    pub texel_size: Vec2,
    pub curl_strength: f32,
    pub dt: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct DivergenceParams<'a, G> {
    pub velocity: &'a G,
    pub texel_size: Vec2,
}

/// One Jacobi iteration of the pressure Poisson equation.
#[derive(Debug, Clone, Copy)]
pub struct PressureParams<'a, G> {
    pub pressure: &'a G,
    pub divergence: &'a G,
    pub texel_size: Vec2,
}

#[derive(Debug, Clone, Copy)]
pub struct GradientSubtractParams<'a, G> {
    pub pressure: &'a G,
    pub velocity: &'a G,
    pub texel_size: Vec2,
}

#[derive(Debug, Clone, Copy)]
pub struct BloomPrefilterParams<'a, G> {
    pub source: &'a G,
    pub threshold: f32,
}

/// One direction of the separable 5-tap Gaussian. `direction` is a unit
/// axis, taps are spaced by `texel_size` along it.
#[derive(Debug, Clone, Copy)]
pub struct BlurParams<'a, G> {
    pub source: &'a G,
    pub texel_size: Vec2,
    pub direction: Vec2,
}

/// `base + overlay`, where `overlay` is the next smaller bloom level.
#[derive(Debug, Clone, Copy)]
pub struct BloomCombineParams<'a, G> {
    pub base: &'a G,
    pub overlay: &'a G,
}

#[derive(Debug, Clone, Copy)]
pub struct DisplayParams<'a, G> {
    pub dye: &'a G,
    pub bloom: Option<&'a G>,
    pub bloom_intensity: f32,
    pub exposure: f32,
    pub gamma: f32,
}

#[derive(Debug, Clone, Copy)]
pub enum Pass<'a, G> {
    Copy(CopyParams<'a, G>),
    Clear(ClearParams<'a, G>),
    Splat(SplatParams<'a, G>),
    Advection(AdvectionParams<'a, G>),
    Curl(CurlParams<'a, G>),
    Vorticity(VorticityParams<'a, G>),
    Divergence(DivergenceParams<'a, G>),
    Pressure(PressureParams<'a, G>),
    GradientSubtract(GradientSubtractParams<'a, G>),
    BloomPrefilter(BloomPrefilterParams<'a, G>),
    Blur(BlurParams<'a, G>),
    BloomCombine(BloomCombineParams<'a, G>),
    Display(DisplayParams<'a, G>),
}

/// Which program a pass runs; one pipeline per kind on the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Copy,
    Clear,
    Splat,
    Advection,
    Curl,
    Vorticity,
    Divergence,
    Pressure,
    GradientSubtract,
    BloomPrefilter,
    Blur,
    BloomCombine,
    Display,
}

impl PassKind {
    pub const ALL: [PassKind; 13] = [
        PassKind::Copy,
        PassKind::Clear,
        PassKind::Splat,
        PassKind::Advection,
        PassKind::Curl,
        PassKind::Vorticity,
        PassKind::Divergence,
        PassKind::Pressure,
        PassKind::GradientSubtract,
        PassKind::BloomPrefilter,
        PassKind::Blur,
        PassKind::BloomCombine,
        PassKind::Display,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PassKind::Copy => "copy",
            PassKind::Clear => "clear",
            PassKind::Splat => "splat",
            PassKind::Advection => "advection",
            PassKind::Curl => "curl",
            PassKind::Vorticity => "vorticity",
            PassKind::Divergence => "divergence",
            PassKind::Pressure => "pressure",
            PassKind::GradientSubtract => "gradient_subtract",
            PassKind::BloomPrefilter => "bloom_prefilter",
            PassKind::Blur => "blur",
            PassKind::BloomCombine => "bloom_combine",
            PassKind::Display => "display",
        }
    }

    /// Number of source grids the program samples.
    pub fn texture_count(self) -> u32 {
        match self {
            PassKind::Advection
            | PassKind::Vorticity
            | PassKind::Pressure
            | PassKind::GradientSubtract
            | PassKind::BloomCombine
            | PassKind::Display => 2,
            _ => 1,
        }
    }
}

impl<G> Pass<'_, G> {
    pub fn kind(&self) -> PassKind {
        match self {
            Pass::Copy(_) => PassKind::Copy,
            Pass::Clear(_) => PassKind::Clear,
            Pass::Splat(_) => PassKind::Splat,
            Pass::Advection(_) => PassKind::Advection,
            Pass::Curl(_) => PassKind::Curl,
            Pass::Vorticity(_) => PassKind::Vorticity,
            Pass::Divergence(_) => PassKind::Divergence,
            Pass::Pressure(_) => PassKind::Pressure,
            Pass::GradientSubtract(_) => PassKind::GradientSubtract,
            Pass::BloomPrefilter(_) => PassKind::BloomPrefilter,
            Pass::Blur(_) => PassKind::Blur,
            Pass::BloomCombine(_) => PassKind::BloomCombine,
            Pass::Display(_) => PassKind::Display,
        }
    }
}

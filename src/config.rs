use bevy::prelude::Resource;
use bevy::render::extract_resource::ExtractResource;
use glam::UVec2;

use crate::field::clamp_size;

/// Stability clamp on the simulation time step (seconds).
pub const MAX_TIME_STEP: f32 = 0.016;

/// Runtime tunables, read by the pipeline at every tick.
///
/// Values outside the documented ranges are accepted as-is by the core;
/// [`FluidConfig::sanitized`] clamps them for callers that take user input.
#[derive(Resource, ExtractResource, Debug, Clone, PartialEq)]
pub struct FluidConfig {
    pub velocity_dissipation: f32, // [0.9, 1.0]
    pub density_dissipation: f32,  // [0.9, 1.0]
    pub pressure_decay: f32,       // [0.9, 1.0]
    pub pressure_iterations: u32,  // [1, 80]
    pub curl_strength: f32,        // [0, 60]
    pub splat_radius: f32,         // [0.001, 0.05]
    pub splat_force: f32,          // [1000, 15000]
    /// integer divisor from output to simulation resolution, [1, 8]
    pub texel_downsample: u32,
    pub paused: bool,
    pub gamma: f32,    // [1, 3]
    pub exposure: f32, // [0.05, 0.6]
    pub enable_bloom: bool,
    pub bloom_intensity: f32, // [0.05, 1.0]
    pub bloom_threshold: f32, // [0, 1.5]
    pub bloom_levels: u32,    // [1, 6]
}

impl Default for FluidConfig {
    fn default() -> Self {
        Self {
            velocity_dissipation: 0.98,
            density_dissipation: 0.97,
            pressure_decay: 0.9,
            pressure_iterations: 20,
            curl_strength: 30.0,
            splat_radius: 0.005,
            splat_force: 6000.0,
            texel_downsample: 1,
            paused: false,
            gamma: 2.2,
            exposure: 0.4,
            enable_bloom: true,
            bloom_intensity: 0.8,
            bloom_threshold: 0.6,
            bloom_levels: 5,
        }
    }
}

impl FluidConfig {
    pub fn sanitized(&self) -> Self {
        Self {
            velocity_dissipation: self.velocity_dissipation.clamp(0.9, 1.0),
            density_dissipation: self.density_dissipation.clamp(0.9, 1.0),
            pressure_decay: self.pressure_decay.clamp(0.9, 1.0),
            pressure_iterations: self.pressure_iterations.clamp(1, 80),
            curl_strength: self.curl_strength.clamp(0.0, 60.0),
            splat_radius: self.splat_radius.clamp(0.001, 0.05),
            splat_force: self.splat_force.clamp(1000.0, 15000.0),
            texel_downsample: self.texel_downsample.clamp(1, 8),
            paused: self.paused,
            gamma: self.gamma.clamp(1.0, 3.0),
            exposure: self.exposure.clamp(0.05, 0.6),
            enable_bloom: self.enable_bloom,
            bloom_intensity: self.bloom_intensity.clamp(0.05, 1.0),
            bloom_threshold: self.bloom_threshold.clamp(0.0, 1.5),
            bloom_levels: self.bloom_levels.clamp(1, 6),
        }
    }

    /// Simulation grid size for a given output surface size.
    pub fn simulation_size(&self, output: UVec2) -> UVec2 {
        let div = self.texel_downsample.max(1);
        clamp_size(output.x / div, output.y / div)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_sit_inside_documented_ranges() {
        let config = FluidConfig::default();
        assert_eq!(config.sanitized(), config);
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let wild = FluidConfig {
            pressure_iterations: 0,
            splat_radius: 1.0,
            texel_downsample: 20,
            bloom_levels: 9,
            gamma: 0.1,
            ..Default::default()
        };
        let clean = wild.sanitized();
        assert_eq!(clean.pressure_iterations, 1);
        assert_eq!(clean.splat_radius, 0.05);
        assert_eq!(clean.texel_downsample, 8);
        assert_eq!(clean.bloom_levels, 6);
        assert_eq!(clean.gamma, 1.0);
    }

    #[test]
    fn simulation_size_floors_and_clamps() {
        let config = FluidConfig {
            texel_downsample: 4,
            ..Default::default()
        };
        assert_eq!(config.simulation_size(UVec2::new(1030, 515)), UVec2::new(257, 128));
        assert_eq!(config.simulation_size(UVec2::new(3, 9)), UVec2::new(2, 2));
    }
}

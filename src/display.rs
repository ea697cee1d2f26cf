// presentation + the per-frame driver tying simulation, bloom and display
use bevy::log::info;
use glam::UVec2;

use crate::bloom::BloomChain;
use crate::config::FluidConfig;
use crate::error::FluidError;
use crate::field::GridHandle;
use crate::fluid::FluidSim;
use crate::input::PointerImpulse;
use crate::pass::{Backend, DisplayParams, Pass};

/// Tone-maps the dye (plus optional glow) onto the output surface.
pub fn present<B: Backend>(
    backend: &mut B,
    dye: &B::Grid,
    bloom: Option<&B::Grid>,
    config: &FluidConfig,
) {
    backend.run(
        None,
        Pass::Display(DisplayParams {
            dye,
            bloom,
            bloom_intensity: config.bloom_intensity,
            exposure: config.exposure,
            gamma: config.gamma,
        }),
    );
}

#[derive(Debug)]
pub struct FluidRenderer<G> {
    sim: FluidSim<G>,
    bloom: BloomChain<G>,
    output: UVec2,
}

impl<G: GridHandle> FluidRenderer<G> {
    pub fn new<B: Backend<Grid = G>>(
        backend: &mut B,
        output: UVec2,
        config: &FluidConfig,
    ) -> Result<Self, FluidError> {
        let sim = FluidSim::new(backend, output, config)?;
        let bloom = BloomChain::new(backend, sim.size(), config.bloom_levels)?;
        Ok(Self { sim, bloom, output })
    }

    /// Output-surface resize notification. Returns whether the simulation
    /// grids were reallocated.
    pub fn resize<B: Backend<Grid = G>>(
        &mut self,
        backend: &mut B,
        output: UVec2,
        config: &FluidConfig,
    ) -> Result<bool, FluidError> {
        if output != self.output {
            info!("output surface now {}x{}", output.x, output.y);
            self.output = output;
        }
        let changed = self.sim.resize(backend, output, config)?;
        self.bloom
            .ensure(backend, self.sim.size(), config.bloom_levels)?;
        Ok(changed)
    }

    /// One full frame: tick, glow, composite.
    pub fn frame<B: Backend<Grid = G>>(
        &mut self,
        backend: &mut B,
        elapsed: f32,
        impulses: &[PointerImpulse],
        config: &FluidConfig,
    ) -> Result<(), FluidError> {
        // picks up downsample / level-count edits made since the last frame
        self.resize(backend, self.output, config)?;

        self.sim.step(backend, elapsed, impulses, config);

        let dye = self.sim.dye().read();
        if config.enable_bloom {
            let glow = self.bloom.apply(backend, dye, config);
            present(backend, dye, Some(glow), config);
        } else {
            present(backend, dye, None, config);
        }
        Ok(())
    }

    pub fn sim(&self) -> &FluidSim<G> {
        &self.sim
    }

    pub fn sim_mut(&mut self) -> &mut FluidSim<G> {
        &mut self.sim
    }

    pub fn bloom(&self) -> &BloomChain<G> {
        &self.bloom
    }

    pub fn output(&self) -> UVec2 {
        self.output
    }

    pub fn free<B: Backend<Grid = G>>(self, backend: &mut B) {
        self.sim.free(backend);
        self.bloom.free(backend);
    }
}

#[cfg(test)]
mod tests {
    use glam::{Vec2, Vec4};

    use super::*;
    use crate::cpu::backend::CpuBackend;
    use crate::pass::PassKind;

    #[test]
    fn frame_ends_with_a_display_pass_at_output_resolution() {
        let output = UVec2::new(32, 16);
        let mut backend = CpuBackend::new(output);
        let config = FluidConfig {
            texel_downsample: 2,
            pressure_iterations: 2,
            bloom_levels: 2,
            ..Default::default()
        };
        let mut renderer = FluidRenderer::new(&mut backend, output, &config).unwrap();
        renderer.frame(&mut backend, 0.016, &[], &config).unwrap();

        assert_eq!(backend.pass_log().last(), Some(&PassKind::Display));
        assert!(backend.pass_log().contains(&PassKind::BloomCombine));
        assert_eq!(backend.surface().len(), 32 * 16);
        assert!(backend.surface().iter().all(|px| *px == Vec4::new(0.0, 0.0, 0.0, 1.0)));
    }

    #[test]
    fn disabling_bloom_skips_the_chain() {
        let mut backend = CpuBackend::new(UVec2::splat(8));
        let config = FluidConfig {
            enable_bloom: false,
            ..Default::default()
        };
        let mut renderer = FluidRenderer::new(&mut backend, UVec2::splat(8), &config).unwrap();
        renderer.frame(&mut backend, 0.016, &[], &config).unwrap();

        let log = backend.pass_log();
        assert!(!log.contains(&PassKind::BloomPrefilter));
        assert!(!log.contains(&PassKind::Blur));
        assert_eq!(log.last(), Some(&PassKind::Display));
    }

    #[test]
    fn config_edits_are_picked_up_between_frames() {
        let mut backend = CpuBackend::new(UVec2::splat(64));
        let mut config = FluidConfig::default();
        let mut renderer = FluidRenderer::new(&mut backend, UVec2::splat(64), &config).unwrap();
        assert_eq!(renderer.sim().size(), UVec2::splat(64));

        config.texel_downsample = 4;
        config.bloom_levels = 2;
        renderer.frame(&mut backend, 0.016, &[], &config).unwrap();
        assert_eq!(renderer.sim().size(), UVec2::splat(16));
        assert_eq!(renderer.bloom().levels().len(), 2);
        assert_eq!(renderer.bloom().levels()[0].buffer.texel_size(), Vec2::splat(1.0 / 16.0));
    }
}

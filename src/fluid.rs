//! One simulation tick of the stable-fluids solver, expressed as an ordered
//! sequence of passes over double-buffered grids.
//!
//! Order per tick: splats, velocity self-advection, vorticity confinement,
//! divergence, pressure decay + Jacobi relaxation, projection, dye
//! advection. Every pass reads `.read()` halves and writes a `.write()`
//! half, then the field is swapped.

use bevy::log::{debug, info, warn};
use glam::{UVec2, Vec3};

use crate::config::{FluidConfig, MAX_TIME_STEP};
use crate::error::FluidError;
use crate::field::{self, DoubleBuffer, GridFormat, GridHandle};
use crate::input::PointerImpulse;
use crate::pass::{
    AdvectionParams, Backend, ClearParams, CurlParams, DivergenceParams, GradientSubtractParams,
    Pass, PressureParams, SplatParams, VorticityParams,
};

/// Owns every simulation grid. Recreated wholesale when the simulation
/// resolution changes.
#[derive(Debug)]
pub struct FluidSim<G> {
    size: UVec2,
    velocity: DoubleBuffer<G>,
    dye: DoubleBuffer<G>,
    pressure: DoubleBuffer<G>,
    divergence: G,
    curl: G,
}

impl<G: GridHandle> FluidSim<G> {
    /// Allocates all fields at the simulation size derived from `output`.
    pub fn new<B: Backend<Grid = G>>(
        backend: &mut B,
        output: UVec2,
        config: &FluidConfig,
    ) -> Result<Self, FluidError> {
        let size = config.simulation_size(output);
        let sim = Self::allocate(backend, size)?;
        info!(
            "fluid sim {}x{} (output {}x{}, downsample {})",
            size.x, size.y, output.x, output.y, config.texel_downsample
        );
        Ok(sim)
    }

    /// All-or-nothing: grids made before a failed allocation are freed.
    fn allocate<B: Backend<Grid = G>>(backend: &mut B, size: UVec2) -> Result<Self, FluidError> {
        let mut made = Vec::new();
        let sim = Self::allocate_tracked(backend, size, &mut made);
        if sim.is_err() {
            for grid in made {
                backend.free(grid);
            }
        }
        sim
    }

    fn allocate_tracked<B: Backend<Grid = G>>(
        backend: &mut B,
        size: UVec2,
        made: &mut Vec<G>,
    ) -> Result<Self, FluidError> {
        let mut grid = |backend: &mut B, format| -> Result<G, FluidError> {
            let grid = field::allocate(backend, size.x, size.y, format)?;
            made.push(grid.clone());
            Ok(grid)
        };
        Ok(Self {
            size,
            velocity: DoubleBuffer::from_slots([
                grid(backend, GridFormat::Rg)?,
                grid(backend, GridFormat::Rg)?,
            ]),
            dye: DoubleBuffer::from_slots([
                grid(backend, GridFormat::Rgba)?,
                grid(backend, GridFormat::Rgba)?,
            ]),
            pressure: DoubleBuffer::from_slots([
                grid(backend, GridFormat::R)?,
                grid(backend, GridFormat::R)?,
            ]),
            divergence: grid(backend, GridFormat::R)?,
            curl: grid(backend, GridFormat::R)?,
        })
    }

    /// Handles an output-surface resize. Fields are only recreated when the
    /// derived simulation size actually changes; returns whether they were.
    pub fn resize<B: Backend<Grid = G>>(
        &mut self,
        backend: &mut B,
        output: UVec2,
        config: &FluidConfig,
    ) -> Result<bool, FluidError> {
        let size = config.simulation_size(output);
        if size == self.size {
            return Ok(false);
        }

        let fresh = Self::allocate(backend, size)?;
        let old = std::mem::replace(self, fresh);
        old.free(backend);
        info!("fluid sim reallocated at {}x{}", size.x, size.y);
        Ok(true)
    }

    pub fn free<B: Backend<Grid = G>>(self, backend: &mut B) {
        self.velocity.free(backend);
        self.dye.free(backend);
        self.pressure.free(backend);
        backend.free(self.divergence);
        backend.free(self.curl);
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn velocity(&self) -> &DoubleBuffer<G> {
        &self.velocity
    }

    pub fn dye(&self) -> &DoubleBuffer<G> {
        &self.dye
    }

    pub fn pressure(&self) -> &DoubleBuffer<G> {
        &self.pressure
    }

    pub fn divergence(&self) -> &G {
        &self.divergence
    }

    pub fn curl(&self) -> &G {
        &self.curl
    }

    fn aspect_ratio(&self) -> f32 {
        self.size.x as f32 / self.size.y as f32
    }

    /// Advances the simulation by `dt` seconds (clamped to [`MAX_TIME_STEP`]).
    /// A paused config skips the tick entirely and drops the impulses.
    pub fn step<B: Backend<Grid = G>>(
        &mut self,
        backend: &mut B,
        dt: f32,
        impulses: &[PointerImpulse],
        config: &FluidConfig,
    ) {
        if config.paused {
            return;
        }
        let dt = if dt.is_finite() {
            dt.clamp(0.0, MAX_TIME_STEP)
        } else {
            warn!("non-finite dt {dt}, ticking with 0");
            0.0
        };

        for impulse in impulses.iter().filter(|i| i.is_active()) {
            self.splat(backend, impulse, config);
        }
        self.advect_velocity(backend, dt, config);
        self.confine_vorticity(backend, dt, config);
        self.compute_divergence(backend);
        self.relax_pressure(backend, config);
        self.project(backend);
        self.advect_dye(backend, dt, config);

        debug!("fluid tick dt={dt:.4} impulses={}", impulses.len());
    }

    /// Adds one impulse to velocity and dye with a Gaussian footprint.
    pub fn splat<B: Backend<Grid = G>>(
        &mut self,
        backend: &mut B,
        impulse: &PointerImpulse,
        config: &FluidConfig,
    ) {
        let force = impulse.delta * config.splat_force;
        let aspect_ratio = self.aspect_ratio();

        backend.run(
            Some(self.velocity.write()),
            Pass::Splat(SplatParams {
                base: self.velocity.read(),
                point: impulse.position,
                value: Vec3::new(force.x, force.y, 0.0),
                radius: config.splat_radius,
                aspect_ratio,
            }),
        );
        self.velocity.swap();

        backend.run(
            Some(self.dye.write()),
            Pass::Splat(SplatParams {
                base: self.dye.read(),
                point: impulse.position,
                value: impulse.color,
                radius: config.splat_radius,
                aspect_ratio,
            }),
        );
        self.dye.swap();
    }

    pub fn advect_velocity<B: Backend<Grid = G>>(
        &mut self,
        backend: &mut B,
        dt: f32,
        config: &FluidConfig,
    ) {
        backend.run(
            Some(self.velocity.write()),
            Pass::Advection(AdvectionParams {
                velocity: self.velocity.read(),
                source: self.velocity.read(),
                texel_size: self.velocity.texel_size(),
                dt,
                dissipation: config.velocity_dissipation,
            }),
        );
        self.velocity.swap();
    }

    pub fn confine_vorticity<B: Backend<Grid = G>>(
        &mut self,
        backend: &mut B,
        dt: f32,
        config: &FluidConfig,
    ) {
        let texel_size = self.velocity.texel_size();
        backend.run(
            Some(&self.curl),
            Pass::Curl(CurlParams {
                velocity: self.velocity.read(),
                texel_size,
            }),
        );

        backend.run(
            Some(self.velocity.write()),
            Pass::Vorticity(VorticityParams {
                velocity: self.velocity.read(),
                curl: &self.curl,
                texel_size,
                curl_strength: config.curl_strength,
                dt,
            }),
        );
        self.velocity.swap();
    }

    /// Fully recomputes the single-buffered divergence grid.
    pub fn compute_divergence<B: Backend<Grid = G>>(&mut self, backend: &mut B) {
        backend.run(
            Some(&self.divergence),
            Pass::Divergence(DivergenceParams {
                velocity: self.velocity.read(),
                texel_size: self.velocity.texel_size(),
            }),
        );
    }

    /// Decays the retained pressure, then runs exactly
    /// `pressure_iterations` Jacobi iterations. No convergence test.
    pub fn relax_pressure<B: Backend<Grid = G>>(&mut self, backend: &mut B, config: &FluidConfig) {
        backend.run(
            Some(self.pressure.write()),
            Pass::Clear(ClearParams {
                source: self.pressure.read(),
                value: config.pressure_decay,
            }),
        );
        self.pressure.swap();

        let texel_size = self.pressure.texel_size();
        for _ in 0..config.pressure_iterations {
            backend.run(
                Some(self.pressure.write()),
                Pass::Pressure(PressureParams {
                    pressure: self.pressure.read(),
                    divergence: &self.divergence,
                    texel_size,
                }),
            );
            self.pressure.swap();
        }
    }

    /// Subtracts the pressure gradient from velocity.
    pub fn project<B: Backend<Grid = G>>(&mut self, backend: &mut B) {
        backend.run(
            Some(self.velocity.write()),
            Pass::GradientSubtract(GradientSubtractParams {
                pressure: self.pressure.read(),
                velocity: self.velocity.read(),
                texel_size: self.velocity.texel_size(),
            }),
        );
        self.velocity.swap();
    }

    pub fn advect_dye<B: Backend<Grid = G>>(&mut self, backend: &mut B, dt: f32, config: &FluidConfig) {
        backend.run(
            Some(self.dye.write()),
            Pass::Advection(AdvectionParams {
                velocity: self.velocity.read(),
                source: self.dye.read(),
                texel_size: self.velocity.texel_size(),
                dt,
                dissipation: config.density_dissipation,
            }),
        );
        self.dye.swap();
    }
}

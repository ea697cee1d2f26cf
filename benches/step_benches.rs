use bevy_stable_fluid::cpu::backend::CpuBackend;
use bevy_stable_fluid::{FluidConfig, FluidRenderer, FluidSim, PointerImpulse};
use criterion::{Criterion, criterion_group, criterion_main};
use glam::{UVec2, Vec2, Vec3};

fn stir() -> PointerImpulse {
    PointerImpulse {
        position: Vec2::splat(0.5),
        delta: Vec2::new(0.01, 0.004),
        down: true,
        moved: true,
        color: Vec3::new(0.15, 0.05, 0.0),
    }
}

fn bench_step(c: &mut Criterion) {
    let config = FluidConfig::default();
    let size = UVec2::splat(64);
    let mut backend = CpuBackend::new(size);
    let mut sim = FluidSim::new(&mut backend, size, &config).unwrap();
    let impulses = [stir()];

    c.bench_function("cpu_step_64x64", |b| {
        b.iter(|| {
            sim.step(&mut backend, 0.016, &impulses, &config);
            backend.clear_pass_log();
        })
    });
}

fn bench_frame(c: &mut Criterion) {
    let config = FluidConfig::default();
    let size = UVec2::splat(64);
    let mut backend = CpuBackend::new(size);
    let mut renderer = FluidRenderer::new(&mut backend, size, &config).unwrap();

    c.bench_function("cpu_frame_with_bloom_64x64", |b| {
        b.iter(|| {
            renderer.frame(&mut backend, 0.016, &[], &config).unwrap();
            backend.clear_pass_log();
        })
    });
}

criterion_group!(benches, bench_step, bench_frame);
criterion_main!(benches);

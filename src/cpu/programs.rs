// per-sample pass programs, mirrored by assets/shaders/*.wgsl
use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};

use crate::cpu::backend::{CpuBackend, CpuGrid};
use crate::pass::Pass;

const VORTICITY_EPSILON: f32 = 1e-5;
const BLOOM_BRIGHTNESS_FLOOR: f32 = 1e-4;
const BLUR_WEIGHTS: [f32; 5] = [0.0625, 0.25, 0.375, 0.25, 0.0625];

/// Neighbor coordinates of `uv` one texel away on each side.
struct Stencil {
    l: Vec2,
    r: Vec2,
    t: Vec2,
    b: Vec2,
}

impl Stencil {
    fn new(uv: Vec2, texel: Vec2) -> Self {
        Self {
            l: uv - Vec2::new(texel.x, 0.0),
            r: uv + Vec2::new(texel.x, 0.0),
            t: uv + Vec2::new(0.0, texel.y),
            b: uv - Vec2::new(0.0, texel.y),
        }
    }
}

/// Evaluates `pass` for the output sample at `uv`.
pub(crate) fn shade(backend: &CpuBackend, pass: &Pass<'_, CpuGrid>, uv: Vec2) -> Vec4 {
    let sample = |grid: &CpuGrid, at: Vec2| backend.sample(grid, at);

    match pass {
        Pass::Copy(p) => sample(p.source, uv),

        Pass::Clear(p) => p.value * sample(p.source, uv),

        Pass::Splat(p) => {
            let mut d = uv - p.point;
            d.x *= p.aspect_ratio;
            let falloff = (-d.dot(d) / p.radius).exp();
            sample(p.base, uv) + falloff * p.value.extend(0.0)
        }

        Pass::Advection(p) => {
            let velocity = sample(p.velocity, uv).xy();
            let coord = (uv - p.dt * velocity * p.texel_size).clamp(Vec2::ZERO, Vec2::ONE);
            p.dissipation * sample(p.source, coord)
        }

        Pass::Curl(p) => {
            let s = Stencil::new(uv, p.texel_size);
            let l = sample(p.velocity, s.l).y;
            let r = sample(p.velocity, s.r).y;
            let t = sample(p.velocity, s.t).x;
            let b = sample(p.velocity, s.b).x;
            Vec4::new(0.5 * (r - l - t + b), 0.0, 0.0, 0.0)
        }

        Pass::Vorticity(p) => {
            let s = Stencil::new(uv, p.texel_size);
            let l = sample(p.curl, s.l).x.abs();
            let r = sample(p.curl, s.r).x.abs();
            let t = sample(p.curl, s.t).x.abs();
            let b = sample(p.curl, s.b).x.abs();
            let c = sample(p.curl, uv).x;

            let mut force = 0.5 * Vec2::new(t - b, r - l);
            force /= force.length() + VORTICITY_EPSILON;
            force *= p.curl_strength * c;
            force.y = -force.y;

            let velocity = sample(p.velocity, uv).xy() + force * p.dt;
            velocity.extend(0.0).extend(0.0)
        }

        Pass::Divergence(p) => {
            let s = Stencil::new(uv, p.texel_size);
            let l = sample(p.velocity, s.l).x;
            let r = sample(p.velocity, s.r).x;
            let t = sample(p.velocity, s.t).y;
            let b = sample(p.velocity, s.b).y;
            Vec4::new(0.5 * (r - l + t - b), 0.0, 0.0, 0.0)
        }

        Pass::Pressure(p) => {
            let s = Stencil::new(uv, p.texel_size);
            let l = sample(p.pressure, s.l).x;
            let r = sample(p.pressure, s.r).x;
            let t = sample(p.pressure, s.t).x;
            let b = sample(p.pressure, s.b).x;
            let divergence = sample(p.divergence, uv).x;
            Vec4::new((l + r + b + t - divergence) * 0.25, 0.0, 0.0, 0.0)
        }

        Pass::GradientSubtract(p) => {
            let s = Stencil::new(uv, p.texel_size);
            let l = sample(p.pressure, s.l).x;
            let r = sample(p.pressure, s.r).x;
            let t = sample(p.pressure, s.t).x;
            let b = sample(p.pressure, s.b).x;
            let velocity = sample(p.velocity, uv).xy() - 0.5 * Vec2::new(r - l, t - b);
            velocity.extend(0.0).extend(0.0)
        }

        Pass::BloomPrefilter(p) => {
            let color = sample(p.source, uv).xyz();
            let brightness = color.max_element();
            let scale = (brightness - p.threshold).max(0.0) / brightness.max(BLOOM_BRIGHTNESS_FLOOR);
            (color * scale).extend(0.0)
        }

        Pass::Blur(p) => {
            let step = p.direction * p.texel_size;
            BLUR_WEIGHTS
                .iter()
                .enumerate()
                .map(|(i, w)| *w * sample(p.source, uv + (i as f32 - 2.0) * step))
                .sum()
        }

        Pass::BloomCombine(p) => sample(p.base, uv) + sample(p.overlay, uv),

        Pass::Display(p) => {
            let mut color = sample(p.dye, uv).xyz();
            if let Some(bloom) = p.bloom {
                color += p.bloom_intensity * sample(bloom, uv).xyz();
            }
            let mapped = Vec3::ONE - (-color.max(Vec3::ZERO) * p.exposure).exp();
            let encoded = mapped.powf(1.0 / p.gamma).clamp(Vec3::ZERO, Vec3::ONE);
            encoded.extend(1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::UVec2;

    use super::*;
    use crate::field::{GridFormat, GridHandle};
    use crate::pass::{
        AdvectionParams, Backend, BloomPrefilterParams, BlurParams, CurlParams, DisplayParams,
        DivergenceParams, PressureParams, SplatParams, VorticityParams,
    };

    fn backend_with(format: GridFormat, size: u32) -> (CpuBackend, CpuGrid, CpuGrid) {
        let mut backend = CpuBackend::new(UVec2::splat(size));
        let a = backend.allocate(UVec2::splat(size), format).unwrap();
        let b = backend.allocate(UVec2::splat(size), format).unwrap();
        (backend, a, b)
    }

    #[test]
    fn splat_is_additive_and_peaks_at_point() {
        let (mut backend, base, out) = backend_with(GridFormat::Rgba, 16);
        backend.write(&base, |_| Vec4::new(0.25, 0.0, 0.0, 0.0));
        backend.run(
            Some(&out),
            Pass::Splat(SplatParams {
                base: &base,
                point: Vec2::new(0.5, 0.5),
                value: Vec3::new(1.0, 0.0, 0.5),
                radius: 0.01,
                aspect_ratio: 1.0,
            }),
        );

        let center = backend.sample(&out, Vec2::splat(0.5));
        let corner = backend.sample(&out, Vec2::splat(0.03125));
        assert!(center.x > 1.0 && center.z > 0.3);
        assert!((corner.x - 0.25).abs() < 1e-6);
        assert_eq!(corner.y, 0.0);
    }

    fn confine(backend: &mut CpuBackend, velocity: &CpuGrid, curl: &CpuGrid, out: &CpuGrid) {
        backend.run(
            Some(out),
            Pass::Vorticity(VorticityParams {
                velocity,
                curl,
                texel_size: velocity.texel_size(),
                curl_strength: 30.0,
                dt: 0.016,
            }),
        );
    }

    #[test]
    fn curl_of_rigid_rotation_is_constant_inside() {
        let (mut backend, vel, curl) = backend_with(GridFormat::Rg, 16);
        backend.write(&vel, |uv| {
            let p = uv - Vec2::splat(0.5);
            Vec4::new(-p.y, p.x, 0.0, 0.0)
        });
        backend.run(
            Some(&curl),
            Pass::Curl(CurlParams {
                velocity: &vel,
                texel_size: vel.texel_size(),
            }),
        );

        // one texel apart per side: 0.5 * (2/16 + 2/16)
        let texels = backend.read(&curl);
        for y in 1..15 {
            for x in 1..15 {
                assert!((texels[y * 16 + x].x - 0.125).abs() < 1e-6, "({x}, {y})");
            }
        }
    }

    #[test]
    fn uniform_curl_leaves_velocity_unchanged() {
        let (mut backend, vel, curl) = backend_with(GridFormat::Rg, 8);
        let out = backend.allocate(UVec2::splat(8), GridFormat::Rg).unwrap();
        backend.write(&vel, |_| Vec4::new(1.0, 2.0, 0.0, 0.0));
        backend.write(&curl, |_| Vec4::new(3.0, 0.0, 0.0, 0.0));

        confine(&mut backend, &vel, &curl, &out);

        for texel in backend.read(&out) {
            assert!(texel.is_finite());
            assert_eq!(*texel, Vec4::new(1.0, 2.0, 0.0, 0.0));
        }
    }

    #[test]
    fn curl_peak_pushes_counter_clockwise() {
        let (mut backend, vel, curl) = backend_with(GridFormat::Rg, 16);
        let out = backend.allocate(UVec2::splat(16), GridFormat::Rg).unwrap();
        // positive peak centered on texel (8, 8)
        let peak = Vec2::splat(8.5 / 16.0);
        backend.write(&curl, |uv| {
            Vec4::new((-(uv - peak).length_squared() / 0.01).exp(), 0.0, 0.0, 0.0)
        });

        confine(&mut backend, &vel, &curl, &out);

        let at = |x: usize, y: usize| backend.read(&out)[y * 16 + x];
        let east = at(11, 8);
        assert!(east.y > 0.0 && east.x.abs() < 1e-6, "{east}");
        let north = at(8, 11);
        assert!(north.x < 0.0 && north.y.abs() < 1e-6, "{north}");
        let west = at(5, 8);
        assert!(west.y < 0.0, "{west}");
        // symmetric neighbourhood at the peak itself
        assert!(at(8, 8).length() < 1e-6);
    }

    #[test]
    fn advection_backtrace_clamps_to_the_edge_texel() {
        let (mut backend, vel, ramp) = backend_with(GridFormat::Rg, 8);
        let out = backend.allocate(UVec2::splat(8), GridFormat::R).unwrap();
        backend.write(&ramp, |uv| Vec4::new(uv.x, 0.0, 0.0, 0.0));

        for (speed, edge) in [(100.0, 0.0625), (-100.0, 0.9375)] {
            backend.write(&vel, |_| Vec4::new(speed, 0.0, 0.0, 0.0));
            backend.run(
                Some(&out),
                Pass::Advection(AdvectionParams {
                    velocity: &vel,
                    source: &ramp,
                    texel_size: vel.texel_size(),
                    dt: 1.0,
                    dissipation: 1.0,
                }),
            );
            assert!(backend.read(&out).iter().all(|t| (t.x - edge).abs() < 1e-6), "speed {speed}");
        }
    }

    #[test]
    fn divergence_of_uniform_flow_is_zero() {
        let (mut backend, vel, div) = backend_with(GridFormat::Rg, 8);
        backend.write(&vel, |_| Vec4::new(3.0, -2.0, 0.0, 0.0));
        backend.run(
            Some(&div),
            Pass::Divergence(DivergenceParams {
                velocity: &vel,
                texel_size: vel.texel_size(),
            }),
        );
        assert!(backend.read(&div).iter().all(|t| t.x == 0.0));
    }

    #[test]
    fn jacobi_step_averages_neighbors() {
        let (mut backend, pressure, out) = backend_with(GridFormat::R, 4);
        let divergence = backend.allocate(UVec2::splat(4), GridFormat::R).unwrap();
        backend.write(&pressure, |_| Vec4::new(2.0, 0.0, 0.0, 0.0));
        backend.write(&divergence, |_| Vec4::new(1.0, 0.0, 0.0, 0.0));
        backend.run(
            Some(&out),
            Pass::Pressure(PressureParams {
                pressure: &pressure,
                divergence: &divergence,
                texel_size: Vec2::splat(0.25),
            }),
        );
        assert!(backend.read(&out).iter().all(|t| t.x == 1.75));
    }

    #[test]
    fn prefilter_drops_colors_below_threshold() {
        let (mut backend, src, out) = backend_with(GridFormat::Rgba, 4);
        backend.write(&src, |uv| {
            if uv.x < 0.5 {
                Vec4::new(0.2, 0.1, 0.0, 1.0)
            } else {
                Vec4::new(1.0, 0.5, 0.0, 1.0)
            }
        });
        backend.run(
            Some(&out),
            Pass::BloomPrefilter(BloomPrefilterParams {
                source: &src,
                threshold: 0.6,
            }),
        );
        let dim = backend.sample(&out, Vec2::new(0.125, 0.5));
        let bright = backend.sample(&out, Vec2::new(0.875, 0.5));
        assert_eq!(dim, Vec4::ZERO);
        assert!((bright.x - 0.4).abs() < 1e-6 && (bright.y - 0.2).abs() < 1e-6);
    }

    #[test]
    fn blur_preserves_constant_fields() {
        let (mut backend, src, out) = backend_with(GridFormat::Rgba, 8);
        backend.write(&src, |_| Vec4::splat(0.5));
        backend.run(
            Some(&out),
            Pass::Blur(BlurParams {
                source: &src,
                texel_size: Vec2::splat(0.125),
                direction: Vec2::X,
            }),
        );
        assert!(backend.read(&out).iter().all(|t| (*t - Vec4::splat(0.5)).abs().max_element() < 1e-6));
    }

    #[test]
    fn display_tone_maps_and_gamma_corrects() {
        let (mut backend, dye, _) = backend_with(GridFormat::Rgba, 4);
        backend.write(&dye, |_| Vec4::new(1.0, 0.0, 4.0, 0.0));
        backend.run(
            None,
            Pass::Display(DisplayParams {
                dye: &dye,
                bloom: None,
                bloom_intensity: 0.8,
                exposure: 0.5,
                gamma: 2.0,
            }),
        );
        let px = backend.surface()[0];
        let expected_r = (1.0f32 - (-0.5f32).exp()).sqrt();
        assert!((px.x - expected_r).abs() < 1e-6);
        assert_eq!(px.y, 0.0);
        assert!(px.z > px.x && px.z <= 1.0);
        assert_eq!(px.w, 1.0);
    }
}

// pointer samples -> normalized impulses consumed by the fluid step
use glam::{Vec2, Vec3};
use rand::Rng;

/// One pointer's contribution to a tick. The core only ever reads these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerImpulse {
    /// normalized, origin bottom-left
    pub position: Vec2,
    pub delta: Vec2,
    pub down: bool,
    pub moved: bool,
    pub color: Vec3, // [0, 1]
}

impl PointerImpulse {
    /// Whether the splat passes should run for this impulse at all.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.down && self.moved && self.delta != Vec2::ZERO
    }
}

#[derive(Debug, Clone)]
struct TrackedPointer {
    id: u64,
    impulse: PointerImpulse,
}

/// Keeps one record per live pointer (mouse or touch), keyed by a
/// platform id. Created on press, updated on move, dropped on release.
#[derive(Debug, Clone, Default)]
pub struct PointerTracker {
    pointers: Vec<TrackedPointer>,
}

impl PointerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `pixel` uses a top-left origin, as windowing systems report it.
    pub fn press(&mut self, id: u64, pixel: Vec2, surface: Vec2, color: Vec3) {
        let position = normalize(pixel, surface);
        let impulse = PointerImpulse {
            position,
            delta: Vec2::ZERO,
            down: true,
            moved: false,
            color,
        };
        match self.pointers.iter_mut().find(|p| p.id == id) {
            Some(tracked) => tracked.impulse = impulse,
            None => self.pointers.push(TrackedPointer { id, impulse }),
        }
    }

    pub fn motion(&mut self, id: u64, pixel: Vec2, surface: Vec2) {
        let Some(tracked) = self.pointers.iter_mut().find(|p| p.id == id) else {
            return;
        };
        let position = normalize(pixel, surface);
        let aspect = surface.x / surface.y.max(1.0);
        let impulse = &mut tracked.impulse;
        impulse.delta = correct_delta(position - impulse.position, aspect);
        impulse.moved = impulse.delta.x.abs() > 0.0 || impulse.delta.y.abs() > 0.0;
        impulse.position = position;
    }

    pub fn release(&mut self, id: u64) {
        self.pointers.retain(|p| p.id != id);
    }

    /// Assigns a fresh colour to every live pointer.
    pub fn recolor_all(&mut self, mut color: impl FnMut() -> Vec3) {
        for tracked in &mut self.pointers {
            tracked.impulse.color = color();
        }
    }

    pub fn is_tracking(&self, id: u64) -> bool {
        self.pointers.iter().any(|p| p.id == id)
    }

    /// Copy of the current impulses; identity is not carried into the core.
    pub fn snapshot(&self) -> Vec<PointerImpulse> {
        self.pointers.iter().map(|p| p.impulse).collect()
    }

    /// Clears `moved` so a resting pointer does not splat again next tick.
    pub fn end_frame(&mut self) {
        for tracked in &mut self.pointers {
            tracked.impulse.moved = false;
            tracked.impulse.delta = Vec2::ZERO;
        }
    }
}

fn normalize(pixel: Vec2, surface: Vec2) -> Vec2 {
    let surface = surface.max(Vec2::ONE);
    Vec2::new(pixel.x / surface.x, 1.0 - pixel.y / surface.y)
}

// keep motion isotropic in pixels: the short axis spans less of the grid
fn correct_delta(delta: Vec2, aspect: f32) -> Vec2 {
    let mut delta = delta;
    if aspect < 1.0 {
        delta.x *= aspect;
    }
    if aspect > 1.0 {
        delta.y /= aspect;
    }
    delta
}

/// Random fully saturated hue, dimmed to 0.15 so tone mapping keeps headroom.
pub fn generate_color<R: Rng + ?Sized>(rng: &mut R) -> Vec3 {
    hsv_to_rgb(rng.gen_range(0.0..1.0), 1.0, 1.0) * 0.15
}

pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Vec3 {
    let i = (h * 6.0).floor();
    let f = h * 6.0 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);

    match (i as i32).rem_euclid(6) {
        0 => Vec3::new(v, t, p),
        1 => Vec3::new(q, v, p),
        2 => Vec3::new(p, v, t),
        3 => Vec3::new(p, q, v),
        4 => Vec3::new(t, p, v),
        _ => Vec3::new(v, p, q),
    }
}

/// Burst of impulses at random positions, e.g. to seed the first frame.
/// Deltas are pre-divided by `splat_force` so the injected velocity has a
/// magnitude of roughly 500 regardless of the configured force.
pub fn random_splats<R: Rng + ?Sized>(
    rng: &mut R,
    count: usize,
    splat_force: f32,
) -> Vec<PointerImpulse> {
    let force = splat_force.max(f32::EPSILON);
    (0..count)
        .map(|_| {
            let color = (generate_color(rng) * 10.0).min(Vec3::ONE);
            let position = Vec2::new(rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0));
            let velocity = Vec2::new(
                1000.0 * (rng.gen_range(0.0..1.0) - 0.5),
                1000.0 * (rng.gen_range(0.0..1.0) - 0.5),
            );
            PointerImpulse {
                position,
                delta: velocity / force,
                down: true,
                moved: true,
                color,
            }
        })
        .collect()
}

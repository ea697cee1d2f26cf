// main-world half of the integration: pointers, keys, per-frame snapshot
use bevy::input::ButtonInput;
use bevy::input::touch::Touches;
use bevy::prelude::*;
use bevy::render::extract_resource::ExtractResource;
use bevy::window::PrimaryWindow;
use glam::{UVec2 as GUVec2, Vec2 as GVec2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::FluidConfig;
use crate::gpu::plugin::GpuFluidPlugin;
use crate::input::{PointerImpulse, PointerTracker, generate_color, random_splats};

const MOUSE_POINTER: u64 = u64::MAX;
// recolours per second while a pointer is held
const COLOR_UPDATE_SPEED: f32 = 10.0;

/// Elapsed time, impulse snapshot and output size for one frame; copied
/// into the render world every frame.
#[derive(Resource, ExtractResource, Clone, Debug, Default)]
pub struct FluidFrame {
    pub elapsed: f32,
    pub impulses: Vec<PointerImpulse>,
    pub output: GUVec2,
}

#[derive(Resource)]
pub struct FluidPointers {
    tracker: PointerTracker,
    queued: Vec<PointerImpulse>,
    rng: StdRng,
    color_timer: f32,
}

impl Default for FluidPointers {
    fn default() -> Self {
        Self {
            tracker: PointerTracker::new(),
            queued: Vec::new(),
            rng: StdRng::from_entropy(),
            color_timer: 0.0,
        }
    }
}

impl FluidPointers {
    /// Adds `count` random impulses to the next frame.
    pub fn queue_random_splats(&mut self, count: usize, splat_force: f32) {
        let splats = random_splats(&mut self.rng, count, splat_force);
        self.queued.extend(splats);
    }

    /// Same as [`Self::queue_random_splats`] with a random count in 5..25.
    pub fn queue_splat_burst(&mut self, splat_force: f32) {
        let count = self.rng.gen_range(5..25);
        self.queue_random_splats(count, splat_force);
    }

    pub fn tracker(&self) -> &PointerTracker {
        &self.tracker
    }

    /// Drains queued splats and live pointer impulses into one snapshot,
    /// then ends the input frame.
    pub fn take_frame(&mut self) -> Vec<PointerImpulse> {
        let mut impulses = self.tracker.snapshot();
        impulses.append(&mut self.queued);
        self.tracker.end_frame();
        impulses
    }

    fn advance_colors(&mut self, dt: f32) {
        self.color_timer += dt * COLOR_UPDATE_SPEED;
        if self.color_timer >= 1.0 {
            self.color_timer = self.color_timer.fract();
            let Self { tracker, rng, .. } = self;
            tracker.recolor_all(|| generate_color(rng));
        }
    }
}

fn seed_splats(mut pointers: ResMut<FluidPointers>, config: Res<FluidConfig>) {
    pointers.queue_splat_burst(config.splat_force);
}

fn handle_keys(
    keys: Res<ButtonInput<KeyCode>>,
    mut config: ResMut<FluidConfig>,
    mut pointers: ResMut<FluidPointers>,
) {
    if keys.just_pressed(KeyCode::KeyP) {
        config.paused = !config.paused;
        info!("fluid {}", if config.paused { "paused" } else { "resumed" });
    }
    if keys.just_pressed(KeyCode::Space) {
        pointers.queue_splat_burst(config.splat_force);
    }
}

fn track_pointers(
    windows: Query<&Window, With<PrimaryWindow>>,
    mouse: Res<ButtonInput<MouseButton>>,
    touches: Res<Touches>,
    time: Res<Time>,
    mut pointers: ResMut<FluidPointers>,
) {
    let Ok(window) = windows.single() else {
        return;
    };
    let surface = GVec2::new(window.width(), window.height());
    let pointers = &mut *pointers;

    if let Some(pos) = window.cursor_position() {
        let pos = GVec2::new(pos.x, pos.y);
        if mouse.just_pressed(MouseButton::Left) {
            let color = generate_color(&mut pointers.rng);
            pointers.tracker.press(MOUSE_POINTER, pos, surface, color);
        } else if mouse.pressed(MouseButton::Left) {
            pointers.tracker.motion(MOUSE_POINTER, pos, surface);
        }
    }
    if mouse.just_released(MouseButton::Left) {
        pointers.tracker.release(MOUSE_POINTER);
    }

    for touch in touches.iter_just_pressed() {
        let pos = GVec2::new(touch.position().x, touch.position().y);
        let color = generate_color(&mut pointers.rng);
        pointers.tracker.press(touch.id(), pos, surface, color);
    }
    for touch in touches.iter() {
        let pos = GVec2::new(touch.position().x, touch.position().y);
        pointers.tracker.motion(touch.id(), pos, surface);
    }
    for touch in touches.iter_just_released().chain(touches.iter_just_canceled()) {
        pointers.tracker.release(touch.id());
    }

    pointers.advance_colors(time.delta_secs());
}

fn publish_frame(
    windows: Query<&Window, With<PrimaryWindow>>,
    time: Res<Time>,
    mut pointers: ResMut<FluidPointers>,
    mut frame: ResMut<FluidFrame>,
) {
    let output = windows
        .single()
        .map(|w| GUVec2::new(w.physical_width(), w.physical_height()))
        .unwrap_or(GUVec2::ZERO);

    frame.elapsed = time.delta_secs();
    frame.impulses = pointers.take_frame();
    frame.output = output;
}

/// Interactive fluid rendered into the camera tagged
/// [`FluidCamera`](crate::gpu::node::FluidCamera).
///
/// Drag with the mouse or touch to inject dye and force, `P` pauses,
/// `Space` adds a burst of random splats. Insert a [`FluidConfig`] before
/// adding the plugin to override the defaults.
pub struct FluidPlugin;

impl Plugin for FluidPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<FluidConfig>()
            .init_resource::<FluidPointers>()
            .init_resource::<FluidFrame>()
            .add_systems(Startup, seed_splats)
            .add_systems(Update, (handle_keys, track_pointers, publish_frame).chain())
            .add_plugins(GpuFluidPlugin);
    }
}

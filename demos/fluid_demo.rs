use bevy::core_pipeline::tonemapping::Tonemapping;
use bevy::diagnostic::{DiagnosticsStore, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;
use bevy_stable_fluid::{FluidCamera, FluidConfig, FluidPlugin};

fn main() {
    App::new()
        .add_plugins((
            DefaultPlugins.set(WindowPlugin {
                primary_window: Some(Window {
                    title: "stable fluid".into(),
                    ..default()
                }),
                ..default()
            }),
            FrameTimeDiagnosticsPlugin::default(),
        ))
        // quarter-resolution simulation keeps integrated GPUs smooth
        .insert_resource(FluidConfig {
            texel_downsample: 2,
            ..default()
        })
        .add_plugins(FluidPlugin)
        .add_systems(Startup, setup)
        .add_systems(Update, log_fps)
        .run();
}

fn setup(mut commands: Commands) {
    commands.spawn((Camera2d, Tonemapping::None, FluidCamera));
    info!("drag to stir, P pauses, Space splats");
}

fn log_fps(diagnostics: Res<DiagnosticsStore>, mut counter: Local<u32>) {
    *counter += 1;
    if *counter >= 120 {
        *counter = 0;

        if let Some(fps_diag) = diagnostics.get(&FrameTimeDiagnosticsPlugin::FPS) {
            if let Some(avg) = fps_diag.average() {
                info!("==== Average FPS over last ~2 s: {:.1} ====", avg);
            }
        }
    }
}

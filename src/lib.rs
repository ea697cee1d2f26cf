pub mod app;
pub mod bloom;
pub mod config;
pub mod display;
pub mod error;
pub mod field;
pub mod fluid;
pub mod input;
pub mod pass;

pub mod cpu {
    pub mod backend;
    pub(crate) mod programs;
}

pub mod gpu {
    pub mod backend;
    pub mod ffi;
    pub mod node;
    pub mod pipeline;
    pub mod plugin;
    pub mod textures;
}

pub use app::{FluidFrame, FluidPlugin, FluidPointers};
pub use config::FluidConfig;
pub use display::FluidRenderer;
pub use error::FluidError;
pub use fluid::FluidSim;
pub use gpu::node::FluidCamera;
pub use input::{PointerImpulse, PointerTracker};
pub use pass::{Backend, Pass, PassKind};

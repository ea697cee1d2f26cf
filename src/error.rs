use thiserror::Error;

use crate::field::GridFormat;

/// Fatal pipeline failures. None of these are retried; they surface to
/// whoever owns the renderer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FluidError {
    /// No renderable, filterable half-float format could stand in for `format`.
    #[error("no renderable and filterable texture format available for {format:?} grids")]
    Capability { format: GridFormat },

    #[error("cannot allocate {width}x{height} {format:?} grid: {reason}")]
    Resource {
        width: u32,
        height: u32,
        format: GridFormat,
        reason: String,
    },

    #[error("pass program `{program}` failed to build: {reason}")]
    ProgramBuild { program: &'static str, reason: String },
}

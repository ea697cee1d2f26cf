// grid resources: formats, handles, double buffering and (re)allocation
use std::fmt::Debug;

use bevy::log::debug;
use glam::{UVec2, Vec2};

use crate::error::FluidError;
use crate::pass::Backend;

/// Smallest extent a grid may have on either axis.
pub const MIN_GRID_DIM: u32 = 2;

/// Channel layout of a grid. Samples are half floats on the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridFormat {
    R,
    Rg,
    Rgba,
}

impl GridFormat {
    pub fn channels(self) -> usize {
        match self {
            GridFormat::R => 1,
            GridFormat::Rg => 2,
            GridFormat::Rgba => 4,
        }
    }
}

/// A backend-owned 2D grid. Handles are cheap to clone and compare equal
/// only when they name the same allocation.
pub trait GridHandle: Clone + PartialEq + Debug {
    fn size(&self) -> UVec2;
    fn format(&self) -> GridFormat;

    fn width(&self) -> u32 {
        self.size().x
    }

    fn height(&self) -> u32 {
        self.size().y
    }

    /// Always derived from the current dimensions, so it can never go stale.
    fn texel_size(&self) -> Vec2 {
        Vec2::ONE / self.size().as_vec2()
    }
}

#[inline]
pub fn clamp_size(width: u32, height: u32) -> UVec2 {
    UVec2::new(width.max(MIN_GRID_DIM), height.max(MIN_GRID_DIM))
}

pub fn allocate<B: Backend>(
    backend: &mut B,
    width: u32,
    height: u32,
    format: GridFormat,
) -> Result<B::Grid, FluidError> {
    let size = clamp_size(width, height);
    let grid = backend.allocate(size, format)?;
    debug!("allocated {}x{} {:?} grid", size.x, size.y, format);
    Ok(grid)
}

/// Reallocates `grid` at the new size with the same format. Contents are
/// discarded. Returns `false` (and touches nothing) when the clamped size is
/// unchanged.
pub fn resize<B: Backend>(
    backend: &mut B,
    grid: &mut B::Grid,
    width: u32,
    height: u32,
) -> Result<bool, FluidError> {
    let size = clamp_size(width, height);
    if grid.size() == size {
        return Ok(false);
    }
    let fresh = backend.allocate(size, grid.format())?;
    let old = std::mem::replace(grid, fresh);
    backend.free(old);
    Ok(true)
}

pub fn free<B: Backend>(backend: &mut B, grid: B::Grid) {
    backend.free(grid);
}

/// Two grids of identical size and format and a parity bit selecting the read half.
#[derive(Debug, Clone)]
pub struct DoubleBuffer<G> {
    slots: [G; 2],
    read: usize,
}

impl<G: GridHandle> DoubleBuffer<G> {
    pub fn allocate<B: Backend<Grid = G>>(
        backend: &mut B,
        width: u32,
        height: u32,
        format: GridFormat,
    ) -> Result<Self, FluidError> {
        let first = allocate(backend, width, height, format)?;
        let second = match allocate(backend, width, height, format) {
            Ok(grid) => grid,
            Err(err) => {
                backend.free(first);
                return Err(err);
            }
        };
        Ok(Self::from_slots([first, second]))
    }

    /// Pairs two grids of identical size and format, the first one read.
    pub fn from_slots(slots: [G; 2]) -> Self {
        Self { slots, read: 0 }
    }

    pub fn into_slots(self) -> [G; 2] {
        self.slots
    }

    #[inline]
    pub fn read(&self) -> &G {
        &self.slots[self.read]
    }

    #[inline]
    pub fn write(&self) -> &G {
        &self.slots[self.read ^ 1]
    }

    /// Flips roles; the grid just written becomes the one read next.
    #[inline]
    pub fn swap(&mut self) {
        self.read ^= 1;
    }

    pub fn size(&self) -> UVec2 {
        self.slots[0].size()
    }

    pub fn texel_size(&self) -> Vec2 {
        self.slots[0].texel_size()
    }

    pub fn format(&self) -> GridFormat {
        self.slots[0].format()
    }

    /// Reallocates both halves together; on failure the old pair is kept.
    pub fn resize<B: Backend<Grid = G>>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> Result<bool, FluidError> {
        if self.size() == clamp_size(width, height) {
            return Ok(false);
        }
        let fresh = Self::allocate(backend, width, height, self.format())?;
        std::mem::replace(self, fresh).free(backend);
        Ok(true)
    }

    pub fn free<B: Backend<Grid = G>>(self, backend: &mut B) {
        let [a, b] = self.into_slots();
        backend.free(a);
        backend.free(b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::backend::CpuBackend;

    #[test]
    fn swap_exchanges_roles_without_copying() {
        let mut backend = CpuBackend::new(UVec2::new(8, 8));
        let mut field = DoubleBuffer::allocate(&mut backend, 8, 4, GridFormat::Rg).unwrap();
        let (read, write) = (field.read().clone(), field.write().clone());
        assert_ne!(read, write);

        field.swap();
        assert_eq!(field.read(), &write);
        assert_eq!(field.write(), &read);

        field.swap();
        assert_eq!(field.read(), &read);
    }

    #[test]
    fn failed_resize_keeps_both_halves_intact() {
        let mut backend = CpuBackend::new(UVec2::new(8, 8));
        let mut field = DoubleBuffer::allocate(&mut backend, 8, 8, GridFormat::Rg).unwrap();
        let (read, write) = (field.read().clone(), field.write().clone());

        // room for one more grid, the pair needs two
        backend.set_grid_limit(Some(3));
        assert!(field.resize(&mut backend, 16, 16).is_err());
        assert_eq!(field.read(), &read);
        assert_eq!(field.write(), &write);
        assert_eq!(field.read().size(), field.write().size());
        assert_eq!(backend.live_grids(), 2);

        backend.set_grid_limit(None);
        assert!(field.resize(&mut backend, 16, 16).unwrap());
        assert_eq!(field.write().size(), UVec2::splat(16));
        assert_eq!(backend.live_grids(), 2);
    }

    #[test]
    fn failed_pair_allocation_frees_the_first_half() {
        let mut backend = CpuBackend::new(UVec2::new(8, 8));
        backend.set_grid_limit(Some(1));
        assert!(DoubleBuffer::allocate(&mut backend, 8, 8, GridFormat::R).is_err());
        assert_eq!(backend.live_grids(), 0);
    }

    #[test]
    fn degenerate_sizes_are_clamped() {
        let mut backend = CpuBackend::new(UVec2::new(8, 8));
        let grid = allocate(&mut backend, 0, 1, GridFormat::R).unwrap();
        assert_eq!(grid.size(), UVec2::new(2, 2));
        assert_eq!(grid.texel_size(), Vec2::splat(0.5));
    }

    #[test]
    fn resize_to_same_size_keeps_the_handle() {
        let mut backend = CpuBackend::new(UVec2::new(8, 8));
        let mut grid = allocate(&mut backend, 16, 16, GridFormat::Rgba).unwrap();
        let before = grid.clone();

        assert!(!resize(&mut backend, &mut grid, 16, 16).unwrap());
        assert_eq!(grid, before);

        assert!(resize(&mut backend, &mut grid, 32, 8).unwrap());
        assert_ne!(grid, before);
        assert_eq!(grid.format(), GridFormat::Rgba);
        assert_eq!(grid.texel_size(), Vec2::new(1.0 / 32.0, 1.0 / 8.0));
        assert_eq!(backend.live_grids(), 1);
    }
}

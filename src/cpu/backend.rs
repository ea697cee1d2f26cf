// CPU reference backend: grids are plain texel arrays and every pass is
// evaluated sample by sample, exactly as the GPU programs would be.
use std::collections::HashMap;

use bevy::log::debug;
use glam::{UVec2, Vec2, Vec4};

use crate::cpu::programs;
use crate::error::FluidError;
use crate::field::{GridFormat, GridHandle};
use crate::pass::{Backend, Pass, PassKind};

/// Allocations above this many texels are refused, standing in for the
/// device limit a GPU would enforce.
pub const MAX_TEXELS: u64 = 1 << 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuGrid {
    id: u32,
    size: UVec2,
    format: GridFormat,
}

impl CpuGrid {
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl GridHandle for CpuGrid {
    fn size(&self) -> UVec2 {
        self.size
    }

    fn format(&self) -> GridFormat {
        self.format
    }
}

#[derive(Debug, Clone)]
pub struct GridData {
    pub size: UVec2,
    pub format: GridFormat,
    pub texels: Vec<Vec4>,
}

impl GridData {
    fn new(size: UVec2, format: GridFormat) -> Self {
        Self {
            size,
            format,
            texels: vec![Vec4::ZERO; (size.x * size.y) as usize],
        }
    }

    #[inline]
    pub fn fetch(&self, x: i32, y: i32) -> Vec4 {
        let x = x.clamp(0, self.size.x as i32 - 1) as u32;
        let y = y.clamp(0, self.size.y as i32 - 1) as u32;
        self.texels[(y * self.size.x + x) as usize]
    }

    /// Bilinear filtering with clamp-to-edge addressing.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        let p = uv * self.size.as_vec2() - 0.5;
        let base = p.floor();
        let t = p - base;
        let (x, y) = (base.x as i32, base.y as i32);

        let bottom = self.fetch(x, y).lerp(self.fetch(x + 1, y), t.x);
        let top = self.fetch(x, y + 1).lerp(self.fetch(x + 1, y + 1), t.x);
        bottom.lerp(top, t.y)
    }

    fn store(&mut self, mut texels: Vec<Vec4>) {
        let mask = channel_mask(self.format);
        for texel in &mut texels {
            *texel *= mask;
        }
        self.texels = texels;
    }
}

fn channel_mask(format: GridFormat) -> Vec4 {
    match format {
        GridFormat::R => Vec4::new(1.0, 0.0, 0.0, 0.0),
        GridFormat::Rg => Vec4::new(1.0, 1.0, 0.0, 0.0),
        GridFormat::Rgba => Vec4::ONE,
    }
}

#[inline]
fn texel_center(x: u32, y: u32, size: UVec2) -> Vec2 {
    (Vec2::new(x as f32, y as f32) + 0.5) / size.as_vec2()
}

pub struct CpuBackend {
    grids: HashMap<u32, GridData>,
    next_id: u32,
    surface: GridData,
    pass_log: Vec<PassKind>,
    allocations: usize,
    grid_limit: Option<usize>,
}

impl CpuBackend {
    pub fn new(surface_size: UVec2) -> Self {
        Self {
            grids: HashMap::new(),
            next_id: 0,
            surface: GridData::new(surface_size.max(UVec2::ONE), GridFormat::Rgba),
            pass_log: Vec::new(),
            allocations: 0,
            grid_limit: None,
        }
    }

    pub fn resize_surface(&mut self, size: UVec2) {
        if self.surface.size != size {
            self.surface = GridData::new(size.max(UVec2::ONE), GridFormat::Rgba);
        }
    }

    pub(crate) fn data(&self, grid: &CpuGrid) -> &GridData {
        self.grids
            .get(&grid.id)
            .unwrap_or_else(|| panic!("grid {} used after it was freed", grid.id))
    }

    fn data_mut(&mut self, grid: &CpuGrid) -> &mut GridData {
        self.grids
            .get_mut(&grid.id)
            .unwrap_or_else(|| panic!("grid {} used after it was freed", grid.id))
    }

    /// Row-major texels, row 0 at v = 0.
    pub fn read(&self, grid: &CpuGrid) -> &[Vec4] {
        &self.data(grid).texels
    }

    pub fn sample(&self, grid: &CpuGrid, uv: Vec2) -> Vec4 {
        self.data(grid).sample(uv)
    }

    /// Fills `grid` from a function of each texel's center coordinate.
    pub fn write(&mut self, grid: &CpuGrid, mut texel: impl FnMut(Vec2) -> Vec4) {
        let size = grid.size;
        let texels = (0..size.y)
            .flat_map(|y| (0..size.x).map(move |x| (x, y)))
            .map(|(x, y)| texel(texel_center(x, y, size)))
            .collect();
        self.data_mut(grid).store(texels);
    }

    pub fn surface(&self) -> &[Vec4] {
        &self.surface.texels
    }

    pub fn sample_surface(&self, uv: Vec2) -> Vec4 {
        self.surface.sample(uv)
    }

    pub fn pass_log(&self) -> &[PassKind] {
        &self.pass_log
    }

    pub fn clear_pass_log(&mut self) {
        self.pass_log.clear();
    }

    /// Total successful allocations since construction.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    pub fn live_grids(&self) -> usize {
        self.grids.len()
    }

    /// Caps how many grids may be live at once, the way device memory
    /// would. `None` removes the cap.
    pub fn set_grid_limit(&mut self, limit: Option<usize>) {
        self.grid_limit = limit;
    }
}

impl Backend for CpuBackend {
    type Grid = CpuGrid;

    fn allocate(&mut self, size: UVec2, format: GridFormat) -> Result<CpuGrid, FluidError> {
        let texels = size.x as u64 * size.y as u64;
        if size.x == 0 || size.y == 0 || texels > MAX_TEXELS {
            return Err(FluidError::Resource {
                width: size.x,
                height: size.y,
                format,
                reason: format!("texel count {texels} outside 1..={MAX_TEXELS}"),
            });
        }
        if let Some(limit) = self.grid_limit.filter(|limit| self.grids.len() >= *limit) {
            return Err(FluidError::Resource {
                width: size.x,
                height: size.y,
                format,
                reason: format!("{limit} grids already live"),
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.allocations += 1;
        self.grids.insert(id, GridData::new(size, format));
        Ok(CpuGrid { id, size, format })
    }

    fn free(&mut self, grid: CpuGrid) {
        if self.grids.remove(&grid.id).is_none() {
            debug!("grid {} freed twice", grid.id);
        }
    }

    fn run(&mut self, target: Option<&CpuGrid>, pass: Pass<'_, CpuGrid>) {
        let size = match target {
            Some(grid) => grid.size,
            None => self.surface.size,
        };

        let mut out = Vec::with_capacity((size.x * size.y) as usize);
        for y in 0..size.y {
            for x in 0..size.x {
                out.push(programs::shade(self, &pass, texel_center(x, y, size)));
            }
        }

        self.pass_log.push(pass.kind());
        match target {
            Some(grid) => self.data_mut(grid).store(out),
            None => self.surface.store(out),
        }
    }

    fn surface_size(&self) -> UVec2 {
        self.surface.size
    }
}

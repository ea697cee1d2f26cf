// bloom: threshold -> downsample chain -> separable blur -> bottom-up combine
use bevy::log::{debug, info};
use glam::{UVec2, Vec2};

use crate::config::FluidConfig;
use crate::error::FluidError;
use crate::field::{self, DoubleBuffer, GridFormat, GridHandle, MIN_GRID_DIM};
use crate::pass::{Backend, BloomCombineParams, BloomPrefilterParams, BlurParams, Pass};

#[derive(Debug)]
pub struct BloomLevel<G> {
    pub buffer: G,
    pub temp: G,
}

/// Owns the bloom level buffers, largest first.
#[derive(Debug)]
pub struct BloomChain<G> {
    levels: Vec<BloomLevel<G>>,
    base_size: UVec2,
    requested: u32,
}

/// Sizes of each level: `base`, then halved until a side would drop below
/// [`MIN_GRID_DIM`] or `requested` levels exist.
pub fn level_sizes(base: UVec2, requested: u32) -> Vec<UVec2> {
    let mut sizes = Vec::with_capacity(requested as usize);
    let mut size = field::clamp_size(base.x, base.y);
    for _ in 0..requested.max(1) {
        sizes.push(size);
        size /= 2;
        if size.x < MIN_GRID_DIM || size.y < MIN_GRID_DIM {
            break;
        }
    }
    sizes
}

impl<G: GridHandle> BloomChain<G> {
    pub fn new<B: Backend<Grid = G>>(
        backend: &mut B,
        base_size: UVec2,
        requested: u32,
    ) -> Result<Self, FluidError> {
        let sizes = level_sizes(base_size, requested);
        let mut levels = Vec::with_capacity(sizes.len());
        for size in &sizes {
            match DoubleBuffer::allocate(backend, size.x, size.y, GridFormat::Rgba) {
                Ok(pair) => {
                    let [buffer, temp] = pair.into_slots();
                    levels.push(BloomLevel { buffer, temp });
                }
                Err(err) => {
                    for level in levels {
                        backend.free(level.buffer);
                        backend.free(level.temp);
                    }
                    return Err(err);
                }
            }
        }
        if levels.len() < requested as usize {
            debug!(
                "bloom chain truncated to {} of {} levels at {}x{}",
                levels.len(),
                requested,
                base_size.x,
                base_size.y
            );
        }
        Ok(Self {
            levels,
            base_size,
            requested,
        })
    }

    /// Recreates the chain when the base size or level count changed.
    pub fn ensure<B: Backend<Grid = G>>(
        &mut self,
        backend: &mut B,
        base_size: UVec2,
        requested: u32,
    ) -> Result<bool, FluidError> {
        if base_size == self.base_size && requested == self.requested {
            return Ok(false);
        }
        let fresh = Self::new(backend, base_size, requested)?;
        std::mem::replace(self, fresh).free(backend);
        info!(
            "bloom chain rebuilt: {} levels from {}x{}",
            self.levels.len(),
            base_size.x,
            base_size.y
        );
        Ok(true)
    }

    pub fn free<B: Backend<Grid = G>>(self, backend: &mut B) {
        for level in self.levels {
            backend.free(level.buffer);
            backend.free(level.temp);
        }
    }

    pub fn levels(&self) -> &[BloomLevel<G>] {
        &self.levels
    }

    /// Derives the glow texture from `source` (the dye) and returns level
    /// 0's buffer, which holds the composited result.
    pub fn apply<B: Backend<Grid = G>>(
        &self,
        backend: &mut B,
        source: &G,
        config: &FluidConfig,
    ) -> &G {
        let levels = &self.levels;

        backend.run(
            Some(&levels[0].buffer),
            Pass::BloomPrefilter(BloomPrefilterParams {
                source,
                threshold: config.bloom_threshold,
            }),
        );

        // smaller target + linear filtering does the downsampling
        for pair in levels.windows(2) {
            backend.copy(&pair[1].buffer, &pair[0].buffer);
        }

        for level in levels {
            let texel_size = level.buffer.texel_size();
            backend.run(
                Some(&level.temp),
                Pass::Blur(BlurParams {
                    source: &level.buffer,
                    texel_size,
                    direction: Vec2::X,
                }),
            );
            backend.run(
                Some(&level.buffer),
                Pass::Blur(BlurParams {
                    source: &level.temp,
                    texel_size,
                    direction: Vec2::Y,
                }),
            );
        }

        for i in (0..levels.len() - 1).rev() {
            let (level, smaller) = (&levels[i], &levels[i + 1]);
            backend.run(
                Some(&level.temp),
                Pass::BloomCombine(BloomCombineParams {
                    base: &level.buffer,
                    overlay: &smaller.buffer,
                }),
            );
            backend.copy(&level.buffer, &level.temp);
        }

        &levels[0].buffer
    }
}

#[cfg(test)]
mod tests {
    use glam::{Vec3, Vec4};

    use super::*;
    use crate::cpu::backend::CpuBackend;

    #[test]
    fn level_sizes_halve_and_truncate() {
        assert_eq!(
            level_sizes(UVec2::new(64, 32), 3),
            vec![UVec2::new(64, 32), UVec2::new(32, 16), UVec2::new(16, 8)]
        );
        // 8x4 -> 4x2 -> (2x1 too small)
        assert_eq!(
            level_sizes(UVec2::new(8, 4), 6),
            vec![UVec2::new(8, 4), UVec2::new(4, 2)]
        );
        assert_eq!(level_sizes(UVec2::new(8, 8), 0).len(), 1);
    }

    #[test]
    fn ensure_rebuilds_only_on_change() {
        let mut backend = CpuBackend::new(UVec2::splat(8));
        let mut chain = BloomChain::new(&mut backend, UVec2::splat(32), 3).unwrap();
        let first = chain.levels()[0].buffer;

        assert!(!chain.ensure(&mut backend, UVec2::splat(32), 3).unwrap());
        assert_eq!(chain.levels()[0].buffer, first);

        assert!(chain.ensure(&mut backend, UVec2::splat(32), 2).unwrap());
        assert_eq!(chain.levels().len(), 2);
        assert_eq!(backend.live_grids(), 4);
    }

    #[test]
    fn partial_chain_is_released_when_a_level_fails() {
        let mut backend = CpuBackend::new(UVec2::splat(8));
        backend.set_grid_limit(Some(3));
        assert!(BloomChain::new(&mut backend, UVec2::splat(32), 3).is_err());
        assert_eq!(backend.live_grids(), 0);
    }

    #[test]
    fn levels_accumulate_bottom_up_into_level_zero() {
        let mut backend = CpuBackend::new(UVec2::splat(16));
        let dye = backend.allocate(UVec2::splat(16), GridFormat::Rgba).unwrap();
        backend.write(&dye, |_| Vec4::new(1.0, 1.0, 1.0, 0.0));
        let config = FluidConfig {
            bloom_threshold: 0.0,
            ..Default::default()
        };

        let chain = BloomChain::new(&mut backend, UVec2::splat(16), 3).unwrap();
        let glow = *chain.apply(&mut backend, &dye, &config);

        // each level carries the whole constant field, so level 0 sums all three
        for texel in backend.read(&glow) {
            assert!((texel.truncate() - Vec3::splat(3.0)).abs().max_element() < 1e-5, "{texel}");
        }
        let middle = &chain.levels()[1].buffer;
        assert!(backend.read(middle).iter().all(|t| (t.x - 2.0).abs() < 1e-5));
    }
}

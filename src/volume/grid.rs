//! Block-addressed view over one mipmap level of one setup.
//!
//! The grid owns the layout math: it turns block coordinates into cache
//! keys, computes edge-truncated block dimensions and origins, and feeds
//! both into the shared [`BlockCache`]. Lookups never block unless the
//! grid's hints say BLOCKING.

use std::sync::Arc;

use crate::cache::{BlockCache, BlockKey, CacheHints, CachedBlock, KeySpace, LoadingStrategy};
use crate::errors::{Result, VolumaError};
use crate::volume::loader::BlockLoader;

pub struct VolatileBlockGrid {
    /// Image dimensions of this mipmap level, in voxels.
    dims: [u64; 3],
    block_size: [u32; 3],
    grid_dims: [u64; 3],
    timepoint: u32,
    setup: u32,
    level: u32,
    key_space: KeySpace,
    hints: CacheHints,
    cache: Arc<BlockCache>,
    loader: Arc<dyn BlockLoader>,
}

impl VolatileBlockGrid {
    pub fn new(
        cache: Arc<BlockCache>,
        loader: Arc<dyn BlockLoader>,
        key_space: KeySpace,
        timepoint: u32,
        setup: u32,
        level: u32,
        dims: [u64; 3],
        block_size: [u32; 3],
        hints: CacheHints,
    ) -> Result<Self> {
        if block_size.contains(&0) {
            return Err(VolumaError::InvalidBlockSize(block_size));
        }
        let grid_dims = [
            dims[0].div_ceil(u64::from(block_size[0])),
            dims[1].div_ceil(u64::from(block_size[1])),
            dims[2].div_ceil(u64::from(block_size[2])),
        ];
        Ok(Self {
            dims,
            block_size,
            grid_dims,
            timepoint,
            setup,
            level,
            key_space,
            hints,
            cache,
            loader,
        })
    }

    #[must_use]
    pub fn dims(&self) -> [u64; 3] {
        self.dims
    }

    #[must_use]
    pub fn block_size(&self) -> [u32; 3] {
        self.block_size
    }

    #[must_use]
    pub fn grid_dims(&self) -> [u64; 3] {
        self.grid_dims
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    fn linear_index(&self, cell: [u64; 3]) -> u64 {
        cell[0] + self.grid_dims[0] * (cell[1] + self.grid_dims[1] * cell[2])
    }

    /// Dimensions and origin of the block at `cell`; blocks on the upper
    /// borders are truncated to the level dimensions.
    fn cell_geometry(&self, cell: [u64; 3]) -> ([u32; 3], [i64; 3]) {
        let mut dims = [0u32; 3];
        let mut origin = [0i64; 3];
        for d in 0..3 {
            let o = cell[d] * u64::from(self.block_size[d]);
            origin[d] = o as i64;
            dims[d] = u64::from(self.block_size[d]).min(self.dims[d] - o) as u32;
        }
        (dims, origin)
    }

    /// The block at `cell`, with the grid's default hints.
    ///
    /// The returned block's payload may still be invalid.
    #[must_use]
    pub fn block_at(&self, cell: [u64; 3]) -> CachedBlock {
        self.block_at_with(cell, self.hints)
    }

    /// The block at `cell` under explicit hints.
    #[must_use]
    pub fn block_at_with(&self, cell: [u64; 3], hints: CacheHints) -> CachedBlock {
        let key = BlockKey::new(
            self.timepoint,
            self.setup,
            self.level,
            self.linear_index(cell),
            &self.key_space,
        );
        if let Some(block) = self.cache.get_if_present(key, hints) {
            return block;
        }
        let (dims, origin) = self.cell_geometry(cell);
        self.cache.get_or_create(key, dims, origin, &self.loader, hints)
    }

    /// Best-effort hint: enqueue asynchronous loads for every block
    /// intersecting the voxel box `[min, max]` (inclusive, level
    /// coordinates). Out-of-volume parts of the box are ignored.
    pub fn prefetch(&self, min: [i64; 3], max: [i64; 3]) {
        let mut lo = [0u64; 3];
        let mut hi = [0u64; 3];
        for d in 0..3 {
            if max[d] < 0 || min[d] >= self.dims[d] as i64 || min[d] > max[d] {
                return;
            }
            lo[d] = (min[d].max(0) as u64) / u64::from(self.block_size[d]);
            hi[d] = (max[d].min(self.dims[d] as i64 - 1) as u64) / u64::from(self.block_size[d]);
        }
        let hints = CacheHints::new(LoadingStrategy::Volatile, self.hints.priority);
        for z in lo[2]..=hi[2] {
            for y in lo[1]..=hi[1] {
                for x in lo[0]..=hi[0] {
                    let _ = self.block_at_with([x, y, z], hints);
                }
            }
        }
    }
}

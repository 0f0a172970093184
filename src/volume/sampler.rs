//! Volatile samplers over block grids.
//!
//! A sampler answers "what is the intensity at this continuous position",
//! with the twist that the answer may not be there yet: samples from blocks
//! whose payload is still being fetched come back pending, and the
//! hierarchical projector falls through to a coarser level for them.

use std::sync::Arc;

use glam::DVec3;

use crate::volume::grid::VolatileBlockGrid;

/// Outcome of sampling a volatile volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolatileSample {
    pub value: f64,
    pub valid: bool,
}

impl VolatileSample {
    #[must_use]
    pub fn valid(value: f64) -> Self {
        Self { value, valid: true }
    }

    /// The backing block is not resident yet.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            value: 0.0,
            valid: false,
        }
    }
}

/// Continuous 3D sampler whose samples may be pending.
pub trait VolatileSampler: Send + Sync {
    fn sample(&self, position: DVec3) -> VolatileSample;
}

/// Nearest-neighbor sampler over a [`VolatileBlockGrid`].
///
/// Positions outside the volume extend with zero (a valid sample), matching
/// the out-of-bounds behavior expected by the projector: only missing data
/// falls through to coarser levels, empty space does not.
pub struct GridSampler {
    grid: Arc<VolatileBlockGrid>,
}

impl GridSampler {
    #[must_use]
    pub fn new(grid: Arc<VolatileBlockGrid>) -> Self {
        Self { grid }
    }
}

impl VolatileSampler for GridSampler {
    fn sample(&self, position: DVec3) -> VolatileSample {
        let dims = self.grid.dims();
        let p = position.round();
        let (x, y, z) = (p.x as i64, p.y as i64, p.z as i64);
        if x < 0
            || y < 0
            || z < 0
            || x >= dims[0] as i64
            || y >= dims[1] as i64
            || z >= dims[2] as i64
        {
            return VolatileSample::valid(0.0);
        }
        let (x, y, z) = (x as u64, y as u64, z as u64);
        let bs = self.grid.block_size();
        let cell = [
            x / u64::from(bs[0]),
            y / u64::from(bs[1]),
            z / u64::from(bs[2]),
        ];
        let block = self.grid.block_at(cell);
        let payload = block.payload();
        if !payload.is_valid() {
            return VolatileSample::pending();
        }
        let origin = block.origin();
        let bd = block.dims();
        let (ox, oy, oz) = (
            (x as i64 - origin[0]) as usize,
            (y as i64 - origin[1]) as usize,
            (z as i64 - origin[2]) as usize,
        );
        let index = ox + bd[0] as usize * (oy + bd[1] as usize * oz);
        VolatileSample::valid(f64::from(payload.samples()[index]))
    }
}

//! Cache keys for multi-resolution volume blocks.

use std::hash::{Hash, Hasher};

/// Dimensions of the key universe a cache serves.
///
/// Needed to linearize `(timepoint, setup, level, index)` into the
/// precomputed hash; `max_levels` is the largest mipmap level count over all
/// setups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpace {
    pub num_timepoints: u32,
    pub num_setups: u32,
    pub max_levels: u32,
}

impl KeySpace {
    #[must_use]
    pub fn new(num_timepoints: u32, num_setups: u32, max_levels: u32) -> Self {
        Self {
            num_timepoints: num_timepoints.max(1),
            num_setups: num_setups.max(1),
            max_levels: max_levels.max(1),
        }
    }
}

/// Identity of one block of one mipmap level.
///
/// `index` is the linearized position of the block on the level's grid.
/// The 32-bit hash is precomputed at construction so the residency table
/// never rehashes hot keys.
#[derive(Debug, Clone, Copy, Eq)]
pub struct BlockKey {
    pub timepoint: u32,
    pub setup: u32,
    pub level: u32,
    pub index: u64,
    hash: u32,
}

impl BlockKey {
    #[must_use]
    pub fn new(timepoint: u32, setup: u32, level: u32, index: u64, space: &KeySpace) -> Self {
        let hash = ((index
            .wrapping_mul(u64::from(space.max_levels))
            .wrapping_add(u64::from(level)))
        .wrapping_mul(u64::from(space.num_setups))
        .wrapping_add(u64::from(setup)))
        .wrapping_mul(u64::from(space.num_timepoints))
        .wrapping_add(u64::from(timepoint)) as u32;
        Self {
            timepoint,
            setup,
            level,
            index,
            hash,
        }
    }
}

impl PartialEq for BlockKey {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.level == other.level
            && self.setup == other.setup
            && self.timepoint == other.timepoint
    }
}

impl Hash for BlockKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash);
    }
}

//! Volume Layer Tests
//!
//! Tests for:
//! - Grid layout: linearized keys, edge-truncated block geometry
//! - GridSampler: nearest-neighbor lookup, out-of-bounds, pending blocks
//! - Prefetch: best-effort box enqueue

use std::sync::Arc;

use glam::DVec3;
use voluma::cache::{BlockCache, BlockKey, CacheConfig, CacheHints, KeySpace, LoadingStrategy};
use voluma::errors::Result;
use voluma::volume::{BlockLoader, GridSampler, Payload, VolatileBlockGrid, VolatileSampler};

/// Fills blocks with `x + 10 y + 100 z` in level coordinates.
struct CoordLoader;

impl BlockLoader for CoordLoader {
    fn bytes_per_element(&self) -> usize {
        2
    }

    fn load_block(&self, _key: BlockKey, dims: [u32; 3], origin: [i64; 3]) -> Result<Payload> {
        let mut data = Vec::with_capacity(dims.iter().map(|&d| d as usize).product());
        for z in 0..dims[2] {
            for y in 0..dims[1] {
                for x in 0..dims[0] {
                    let value = (origin[0] + i64::from(x))
                        + 10 * (origin[1] + i64::from(y))
                        + 100 * (origin[2] + i64::from(z));
                    data.push(value as u16);
                }
            }
        }
        Ok(Payload::valid(data))
    }
}

fn grid(cache: &Arc<BlockCache>, strategy: LoadingStrategy) -> Arc<VolatileBlockGrid> {
    Arc::new(
        VolatileBlockGrid::new(
            Arc::clone(cache),
            Arc::new(CoordLoader),
            KeySpace::new(1, 1, 1),
            0,
            0,
            0,
            [10, 10, 3],
            [4, 4, 2],
            CacheHints::new(strategy, 0),
        )
        .unwrap(),
    )
}

fn no_fetcher_cache() -> Arc<BlockCache> {
    BlockCache::new(CacheConfig {
        num_fetcher_threads: 0,
        ..Default::default()
    })
    .unwrap()
}

// ============================================================================
// Grid layout
// ============================================================================

#[test]
fn grid_dimensions_round_up() {
    let cache = no_fetcher_cache();
    let grid = grid(&cache, LoadingStrategy::Blocking);
    assert_eq!(grid.grid_dims(), [3, 3, 2]);
}

#[test]
fn border_blocks_are_truncated() {
    let cache = no_fetcher_cache();
    let grid = grid(&cache, LoadingStrategy::Blocking);
    let corner = grid.block_at([2, 2, 1]);
    assert_eq!(corner.dims(), [2, 2, 1]);
    assert_eq!(corner.origin(), [8, 8, 2]);

    let full = grid.block_at([0, 0, 0]);
    assert_eq!(full.dims(), [4, 4, 2]);
    assert_eq!(full.origin(), [0, 0, 0]);
}

#[test]
fn rejects_zero_block_size() {
    let cache = no_fetcher_cache();
    let result = VolatileBlockGrid::new(
        cache,
        Arc::new(CoordLoader),
        KeySpace::new(1, 1, 1),
        0,
        0,
        0,
        [10, 10, 3],
        [4, 0, 2],
        CacheHints::new(LoadingStrategy::Blocking, 0),
    );
    assert!(result.is_err());
}

// ============================================================================
// Sampling
// ============================================================================

#[test]
fn nearest_neighbor_sampling() {
    let cache = no_fetcher_cache();
    let sampler = GridSampler::new(grid(&cache, LoadingStrategy::Blocking));

    let sample = sampler.sample(DVec3::new(3.4, 2.6, 0.1));
    assert!(sample.valid);
    assert_eq!(sample.value, 33.0);

    // Crosses into the neighboring block.
    let sample = sampler.sample(DVec3::new(4.0, 0.0, 0.0));
    assert!(sample.valid);
    assert_eq!(sample.value, 4.0);
}

#[test]
fn out_of_bounds_extends_with_zero() {
    let cache = no_fetcher_cache();
    let sampler = GridSampler::new(grid(&cache, LoadingStrategy::Blocking));

    let sample = sampler.sample(DVec3::new(-3.0, 5.0, 0.0));
    assert!(sample.valid);
    assert_eq!(sample.value, 0.0);

    let sample = sampler.sample(DVec3::new(5.0, 5.0, 40.0));
    assert!(sample.valid);
    assert_eq!(sample.value, 0.0);
}

#[test]
fn unloaded_blocks_sample_as_pending() {
    let cache = no_fetcher_cache();
    let sampler = GridSampler::new(grid(&cache, LoadingStrategy::Volatile));

    let sample = sampler.sample(DVec3::new(1.0, 1.0, 0.0));
    assert!(!sample.valid);
    // The touched block was queued for loading.
    assert_eq!(cache.outstanding(), 1);
}

// ============================================================================
// Prefetch
// ============================================================================

#[test]
fn prefetch_enqueues_covered_blocks() {
    let cache = no_fetcher_cache();
    let grid = grid(&cache, LoadingStrategy::Volatile);

    // The whole volume covers 3 x 3 x 2 blocks.
    grid.prefetch([0, 0, 0], [9, 9, 2]);
    assert_eq!(cache.outstanding(), 18);

    // Prefetching again within the same frame enqueues nothing new.
    grid.prefetch([0, 0, 0], [9, 9, 2]);
    assert_eq!(cache.outstanding(), 18);
}

#[test]
fn prefetch_clamps_to_volume() {
    let cache = no_fetcher_cache();
    let grid = grid(&cache, LoadingStrategy::Volatile);

    grid.prefetch([-100, -100, -100], [0, 0, 0]);
    assert_eq!(cache.outstanding(), 1);

    grid.prefetch([50, 0, 0], [60, 9, 2]);
    assert_eq!(cache.outstanding(), 1);
}

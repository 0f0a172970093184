//! Block Cache Tests
//!
//! Tests for:
//! - Residency: one entry per key, reclamation through the lifetime tiers
//! - Validity: invalid -> valid exactly once, never back
//! - Loading strategies: BLOCKING, VOLATILE, BUDGETED
//! - Enqueue idempotence within a generation and frame rollover
//! - Fetcher pause/wake
//! - The byte-bounded LRU tier

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use voluma::cache::{
    BlockCache, BlockKey, CacheConfig, CacheHints, KeySpace, LoadingStrategy, RenderContext,
};
use voluma::errors::Result;
use voluma::volume::{BlockLoader, Payload};

struct TestLoader {
    delay: Duration,
    loads: AtomicUsize,
}

impl TestLoader {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            loads: AtomicUsize::new(0),
        })
    }

    fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl BlockLoader for TestLoader {
    fn bytes_per_element(&self) -> usize {
        2
    }

    fn load_block(&self, key: BlockKey, dims: [u32; 3], _origin: [i64; 3]) -> Result<Payload> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        let len = dims.iter().map(|&d| d as usize).product();
        Ok(Payload::valid(vec![key.index as u16; len]))
    }
}

fn test_key(index: u64) -> BlockKey {
    BlockKey::new(0, 0, 0, index, &KeySpace::new(1, 1, 1))
}

fn no_fetcher_cache() -> Arc<BlockCache> {
    BlockCache::new(CacheConfig {
        num_fetcher_threads: 0,
        ..Default::default()
    })
    .unwrap()
}

const VOLATILE: CacheHints = CacheHints {
    strategy: LoadingStrategy::Volatile,
    priority: 0,
};
const BLOCKING: CacheHints = CacheHints {
    strategy: LoadingStrategy::Blocking,
    priority: 0,
};
const BUDGETED: CacheHints = CacheHints {
    strategy: LoadingStrategy::Budgeted,
    priority: 0,
};

const DIMS: [u32; 3] = [4, 4, 4];
const ORIGIN: [i64; 3] = [0, 0, 0];

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let t0 = Instant::now();
    while t0.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    done()
}

// ============================================================================
// Residency
// ============================================================================

#[test]
fn one_entry_per_key() {
    let cache = no_fetcher_cache();
    let loader = TestLoader::new(Duration::ZERO);
    let loader: Arc<dyn BlockLoader> = loader;
    let key = test_key(1);

    let a = cache.get_or_create(key, DIMS, ORIGIN, &loader, VOLATILE);
    let b = cache.get_or_create(key, DIMS, ORIGIN, &loader, VOLATILE);
    // Both handles observe the same placeholder payload.
    assert!(std::ptr::eq(&raw const *a, &raw const *b));
}

#[test]
fn absent_key_is_none() {
    let cache = no_fetcher_cache();
    assert!(cache.get_if_present(test_key(7), VOLATILE).is_none());
}

#[test]
fn entry_reclaimed_after_pins_drop() {
    let cache = no_fetcher_cache();
    let loader: Arc<dyn BlockLoader> = TestLoader::new(Duration::ZERO);
    let key = test_key(1);

    let block = cache.get_or_create(key, DIMS, ORIGIN, &loader, VOLATILE);
    // Pinned by the frame and by the handle.
    cache.prepare_next_frame();
    assert!(cache.get_if_present(key, VOLATILE).is_some());

    // Dropping the last handle leaves only dead weak references; the next
    // rollover purges the key.
    drop(block);
    cache.prepare_next_frame();
    assert!(cache.get_if_present(key, VOLATILE).is_none());
}

#[test]
fn loaded_entry_survives_in_lru_tier() {
    let cache = no_fetcher_cache();
    let loader: Arc<dyn BlockLoader> = TestLoader::new(Duration::ZERO);
    let key = test_key(1);

    let block = cache.get_or_create(key, DIMS, ORIGIN, &loader, BLOCKING);
    assert!(block.is_valid());
    drop(block);
    cache.prepare_next_frame();
    cache.prepare_next_frame();
    // Loaded data is retained by the soft tier even with no handles.
    let resident = cache.get_if_present(key, VOLATILE).expect("retained");
    assert!(resident.is_valid());
}

#[test]
fn lru_tier_honors_byte_ceiling() {
    // One 4x4x4 u16 block is 128 bytes; ceiling fits exactly one.
    let cache = BlockCache::new(CacheConfig {
        num_fetcher_threads: 0,
        soft_ceiling_bytes: 128,
        ..Default::default()
    })
    .unwrap();
    let loader: Arc<dyn BlockLoader> = TestLoader::new(Duration::ZERO);

    cache.get_or_create(test_key(1), DIMS, ORIGIN, &loader, BLOCKING);
    cache.get_or_create(test_key(2), DIMS, ORIGIN, &loader, BLOCKING);
    cache.prepare_next_frame();

    // The older block was evicted and reclaimed, the newer one survives.
    assert!(cache.get_if_present(test_key(1), VOLATILE).is_none());
    assert!(cache.get_if_present(test_key(2), VOLATILE).is_some());
}

// ============================================================================
// Validity
// ============================================================================

#[test]
fn blocking_load_is_synchronous_and_loads_once() {
    let cache = no_fetcher_cache();
    let loader = TestLoader::new(Duration::ZERO);
    let dyn_loader: Arc<dyn BlockLoader> = Arc::clone(&loader) as Arc<dyn BlockLoader>;
    let key = test_key(3);

    let block = cache.get_or_create(key, DIMS, ORIGIN, &dyn_loader, BLOCKING);
    assert!(block.is_valid());
    assert_eq!(block.payload().samples()[0], 3);

    // A second blocking access finds the data without reloading.
    let again = cache.get_or_create(key, DIMS, ORIGIN, &dyn_loader, BLOCKING);
    assert!(again.is_valid());
    assert_eq!(loader.load_count(), 1);
}

#[test]
fn validity_is_monotone() {
    let cache = no_fetcher_cache();
    let loader: Arc<dyn BlockLoader> = TestLoader::new(Duration::ZERO);
    let key = test_key(4);

    let block = cache.get_or_create(key, DIMS, ORIGIN, &loader, VOLATILE);
    assert!(!block.is_valid());
    let block = cache.get_or_create(key, DIMS, ORIGIN, &loader, BLOCKING);
    assert!(block.is_valid());
    for _ in 0..100 {
        assert!(block.is_valid());
    }
    assert_eq!(cache.enqueue_generation(key), Some(u64::MAX));
}

// ============================================================================
// VOLATILE strategy and enqueue idempotence
// ============================================================================

#[test]
fn volatile_load_completes_in_background() {
    let cache = BlockCache::new(CacheConfig::default()).unwrap();
    let loader: Arc<dyn BlockLoader> = TestLoader::new(Duration::from_millis(5));
    let key = test_key(5);

    let block = cache.get_or_create(key, DIMS, ORIGIN, &loader, VOLATILE);
    assert!(wait_until(Duration::from_secs(2), || block.is_valid()));
    assert_eq!(block.payload().samples()[0], 5);
}

#[test]
fn enqueue_is_idempotent_within_a_generation() {
    let cache = no_fetcher_cache();
    let loader: Arc<dyn BlockLoader> = TestLoader::new(Duration::ZERO);
    let key = test_key(6);

    let _block = cache.get_or_create(key, DIMS, ORIGIN, &loader, VOLATILE);
    for _ in 0..10 {
        cache.get_if_present(key, VOLATILE);
    }
    assert_eq!(cache.outstanding(), 1);
    assert_eq!(cache.enqueue_generation(key), Some(cache.current_generation()));
}

#[test]
fn frame_rollover_reenqueues_exactly_once() {
    let cache = no_fetcher_cache();
    let loader: Arc<dyn BlockLoader> = TestLoader::new(Duration::ZERO);
    let key = test_key(8);

    let _block = cache.get_or_create(key, DIMS, ORIGIN, &loader, VOLATILE);
    let generation = cache.current_generation();
    assert_eq!(cache.enqueue_generation(key), Some(generation));

    // Rollover preserves the unserved key in the prefetch shadow.
    cache.prepare_next_frame();
    assert_eq!(cache.outstanding(), 1);

    // The same key is re-enqueued once for the new frame.
    cache.get_if_present(key, VOLATILE);
    cache.get_if_present(key, VOLATILE);
    assert_eq!(cache.outstanding(), 2);
    assert_eq!(cache.enqueue_generation(key), Some(generation + 1));
}

// ============================================================================
// BUDGETED strategy
// ============================================================================

#[test]
fn budgeted_access_returns_when_budget_runs_out() {
    // No fetchers: the wait can only end by budget exhaustion.
    let cache = no_fetcher_cache();
    let loader: Arc<dyn BlockLoader> = TestLoader::new(Duration::from_millis(50));
    let key = test_key(9);

    let context = RenderContext::new(1);
    let _guard = context.enter();
    cache.init_io_budget(&[5_000_000]);

    let t0 = Instant::now();
    let block = cache.get_or_create(key, DIMS, ORIGIN, &loader, BUDGETED);
    let elapsed = t0.elapsed();

    assert!(!block.is_valid());
    assert!(elapsed >= Duration::from_millis(4), "returned too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(40), "overstayed budget: {elapsed:?}");
    assert_eq!(cache.enqueue_generation(key), Some(cache.current_generation()));
    assert!(context.budget().time_left(0) <= 0);
    // The wait was accounted as blocking I/O of this job.
    assert!(context.stats().io_nanos() >= 4_000_000);
}

#[test]
fn budgeted_access_with_exhausted_budget_only_enqueues() {
    let cache = no_fetcher_cache();
    let loader: Arc<dyn BlockLoader> = TestLoader::new(Duration::from_millis(50));
    let key = test_key(10);

    let context = RenderContext::new(1);
    let _guard = context.enter();
    cache.init_io_budget(&[0]);

    let t0 = Instant::now();
    let block = cache.get_or_create(key, DIMS, ORIGIN, &loader, BUDGETED);
    assert!(!block.is_valid());
    assert!(t0.elapsed() < Duration::from_millis(20));
    assert_eq!(cache.outstanding(), 1);
}

// ============================================================================
// Loader failures
// ============================================================================

/// Fails a configurable number of times before delivering data.
struct FlakyLoader {
    failures_left: AtomicUsize,
    interrupt: bool,
}

impl BlockLoader for FlakyLoader {
    fn bytes_per_element(&self) -> usize {
        2
    }

    fn load_block(&self, _key: BlockKey, dims: [u32; 3], _origin: [i64; 3]) -> Result<Payload> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(if self.interrupt {
                voluma::VolumaError::Interrupted
            } else {
                voluma::VolumaError::Loader("backend unavailable".into())
            });
        }
        Ok(Payload::valid(vec![
            7;
            dims.iter().map(|&d| d as usize).product()
        ]))
    }
}

#[test]
fn loader_failure_keeps_placeholder_and_retries() {
    let cache = no_fetcher_cache();
    let loader: Arc<dyn BlockLoader> = Arc::new(FlakyLoader {
        failures_left: AtomicUsize::new(1),
        interrupt: false,
    });
    let key = test_key(20);

    // The failed load leaves an invalid placeholder behind.
    let block = cache.get_or_create(key, DIMS, ORIGIN, &loader, BLOCKING);
    assert!(!block.is_valid());

    // The next access simply tries again.
    let block = cache.get_or_create(key, DIMS, ORIGIN, &loader, BLOCKING);
    assert!(block.is_valid());
    assert_eq!(block.payload().samples()[0], 7);
}

#[test]
fn blocking_retries_through_interruption() {
    let cache = no_fetcher_cache();
    let loader: Arc<dyn BlockLoader> = Arc::new(FlakyLoader {
        failures_left: AtomicUsize::new(3),
        interrupt: true,
    });
    let key = test_key(21);

    // BLOCKING swallows interrupts and loops until the data is there.
    let block = cache.get_or_create(key, DIMS, ORIGIN, &loader, BLOCKING);
    assert!(block.is_valid());
}

// ============================================================================
// Fetcher pause / wake
// ============================================================================

#[test]
fn paused_fetchers_do_not_consume() {
    let cache = BlockCache::new(CacheConfig::default()).unwrap();
    let loader: Arc<dyn BlockLoader> = TestLoader::new(Duration::ZERO);
    let key = test_key(11);

    cache.pause_fetchers_until(Instant::now() + Duration::from_secs(30));
    let block = cache.get_or_create(key, DIMS, ORIGIN, &loader, VOLATILE);
    std::thread::sleep(Duration::from_millis(50));
    assert!(!block.is_valid());

    cache.wake_fetchers();
    assert!(wait_until(Duration::from_secs(2), || block.is_valid()));
}

#[test]
fn pause_deadline_expires_on_its_own() {
    let cache = BlockCache::new(CacheConfig::default()).unwrap();
    let loader: Arc<dyn BlockLoader> = TestLoader::new(Duration::ZERO);
    let key = test_key(12);

    cache.pause_fetchers_until(Instant::now() + Duration::from_millis(30));
    let block = cache.get_or_create(key, DIMS, ORIGIN, &loader, VOLATILE);
    assert!(wait_until(Duration::from_secs(2), || block.is_valid()));
}

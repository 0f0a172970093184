//! Shared block cache with asynchronous population.
//!
//! The cache maps [`BlockKey`]s to entries through three lifetime tiers:
//!
//! - **transient**: the current-frame pin list holds strong references to
//!   every entry enqueued this frame, so outstanding work cannot be
//!   reclaimed under it;
//! - **cacheable**: entries whose payload has been loaded are promoted into
//!   an LRU tier bounded by a byte ceiling, so loaded data survives until
//!   memory pressure evicts it;
//! - **reclaimable**: the residency table itself only holds weak
//!   references. Once the pin list and the LRU tier have both released an
//!   entry, it dies with its last outside [`CachedBlock`] handle and its
//!   key is purged on the next frame rollover.
//!
//! Loading happens under one of three strategies ([`LoadingStrategy`]);
//! asynchronous loads are queued per priority and drained by the
//! [`FetcherPool`](super::fetcher::FetcherPool).

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::cache::fetcher::FetcherPool;
use crate::cache::key::BlockKey;
use crate::cache::queue::BlockingPriorityQueue;
use crate::cache::stats::RenderContext;
use crate::errors::{Result, VolumaError};
use crate::volume::loader::{Block, BlockLoader};

/// How a cache access behaves when the block is not yet valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingStrategy {
    /// Enqueue an asynchronous load and return immediately.
    Volatile,
    /// Load synchronously on the calling thread, retrying through
    /// interruption until the data is there.
    Blocking,
    /// Enqueue, then block up to the caller's remaining I/O budget for the
    /// access priority; return the (possibly still invalid) block after.
    Budgeted,
}

/// Per-access cache behavior: strategy plus queue priority.
///
/// Priorities are assigned as `max_levels - level`, so coarser mipmap
/// levels load first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHints {
    pub strategy: LoadingStrategy,
    pub priority: usize,
}

impl CacheHints {
    #[must_use]
    pub fn new(strategy: LoadingStrategy, priority: usize) -> Self {
        Self { strategy, priority }
    }

    /// Hints for accessing mipmap `level` of a setup with `max_levels`
    /// levels, using the standard coarse-first priority assignment.
    #[must_use]
    pub fn with_level_priority(strategy: LoadingStrategy, max_levels: usize, level: usize) -> Self {
        Self {
            strategy,
            priority: max_levels.saturating_sub(level),
        }
    }
}

/// Cache construction options.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Worker threads draining the fetch queue. `0` disables asynchronous
    /// loading entirely (queued keys are never served), which is
    /// occasionally useful in tests.
    pub num_fetcher_threads: usize,
    /// Priority lanes of the fetch queue.
    pub num_priorities: usize,
    /// Byte ceiling of the loaded-block LRU tier.
    pub soft_ceiling_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            num_fetcher_threads: 2,
            num_priorities: 8,
            soft_ceiling_bytes: 256 * 1024 * 1024,
        }
    }
}

// ============================================================================
// Entries and consumer handles
// ============================================================================

pub(crate) struct Entry {
    pub(crate) key: BlockKey,
    block: Block,
    loader: Arc<dyn BlockLoader>,
    /// Generation at which this entry was last enqueued. `u64::MAX` marks a
    /// valid entry that must never be re-enqueued; `0` means never enqueued.
    enqueue_generation: AtomicU64,
    /// Entry monitor: loads happen under this lock, waiters block on
    /// `loaded` with it.
    load_lock: Mutex<()>,
    loaded: Condvar,
}

impl Entry {
    fn new(key: BlockKey, dims: [u32; 3], origin: [i64; 3], loader: &Arc<dyn BlockLoader>) -> Self {
        let placeholder = loader.empty_block(dims);
        Self {
            key,
            block: Block::placeholder(dims, origin, placeholder),
            loader: Arc::clone(loader),
            enqueue_generation: AtomicU64::new(0),
            load_lock: Mutex::new(()),
            loaded: Condvar::new(),
        }
    }

    fn size_bytes(&self) -> usize {
        self.block.num_elements() * self.loader.bytes_per_element()
    }
}

/// Strong handle to a resident block.
///
/// Holding it counts as an "outstanding consumer": the underlying cache
/// entry stays resident (and its key answers `get_if_present`) for as long
/// as any handle lives.
#[derive(Clone)]
pub struct CachedBlock {
    entry: Arc<Entry>,
}

impl CachedBlock {
    #[must_use]
    pub fn key(&self) -> BlockKey {
        self.entry.key
    }
}

impl Deref for CachedBlock {
    type Target = Block;

    fn deref(&self) -> &Block {
        &self.entry.block
    }
}

struct SoftTier {
    lru: LruCache<BlockKey, Arc<Entry>>,
    bytes: usize,
    ceiling: usize,
}

// ============================================================================
// Cache internals (shared with the fetcher pool)
// ============================================================================

pub(crate) struct CacheInner {
    table: RwLock<FxHashMap<BlockKey, Weak<Entry>>>,
    pinned: Mutex<Vec<Arc<Entry>>>,
    soft: Mutex<SoftTier>,
    queue: Arc<BlockingPriorityQueue<BlockKey>>,
    generation: AtomicU64,
}

impl CacheInner {
    pub(crate) fn lookup(&self, key: BlockKey) -> Option<Arc<Entry>> {
        self.table.read().get(&key).and_then(Weak::upgrade)
    }

    /// Idempotent per frame: an entry is enqueued at most once per
    /// generation, and a valid entry never again.
    fn enqueue(&self, entry: &Arc<Entry>, priority: usize) {
        let generation = self.generation.load(Ordering::Acquire);
        let mut seen = entry.enqueue_generation.load(Ordering::Acquire);
        while seen < generation {
            match entry.enqueue_generation.compare_exchange_weak(
                seen,
                generation,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    // Pin for the rest of the frame so the fetcher finds the
                    // entry alive when it gets to the key.
                    self.pinned.lock().push(Arc::clone(entry));
                    self.queue.put(entry.key, priority);
                    break;
                }
                Err(current) => seen = current,
            }
        }
    }

    /// Loads the entry's block if it is still invalid, publishing the
    /// payload and waking budgeted waiters.
    pub(crate) fn load_if_invalid(&self, entry: &Arc<Entry>) -> Result<()> {
        let guard = entry.load_lock.lock();
        if entry.block.is_valid() {
            return Ok(());
        }
        let context = RenderContext::current();
        if let Some(ctx) = &context {
            ctx.stats().start();
        }
        let result = entry
            .loader
            .load_block(entry.key, entry.block.dims(), entry.block.origin());
        if let Some(ctx) = &context {
            ctx.stats().stop();
        }
        match result {
            Ok(payload) => {
                entry.block.publish(payload);
                entry.enqueue_generation.store(u64::MAX, Ordering::Release);
                if let Some(ctx) = &context {
                    ctx.stats().add_bytes(entry.size_bytes() as u64);
                }
                self.promote(entry);
                entry.loaded.notify_all();
                drop(guard);
                Ok(())
            }
            Err(VolumaError::Interrupted) => {
                log::debug!("load of {:?} interrupted", entry.key);
                Err(VolumaError::Interrupted)
            }
            Err(err) => {
                // The block stays a placeholder; the next access retries.
                log::error!("loader failed for {:?}: {err}", entry.key);
                Err(err)
            }
        }
    }

    /// Moves a loaded entry into the byte-bounded LRU tier.
    fn promote(&self, entry: &Arc<Entry>) {
        let mut soft = self.soft.lock();
        let size = entry.size_bytes();
        if soft.lru.put(entry.key, Arc::clone(entry)).is_none() {
            soft.bytes += size;
        }
        while soft.bytes > soft.ceiling {
            match soft.lru.pop_lru() {
                Some((_, evicted)) => soft.bytes -= evicted.size_bytes(),
                None => break,
            }
        }
    }

    fn touch(&self, key: BlockKey) {
        self.soft.lock().lru.get(&key);
    }

    fn apply_hints(&self, entry: &Arc<Entry>, hints: CacheHints) {
        if entry.block.is_valid() {
            return;
        }
        match hints.strategy {
            LoadingStrategy::Volatile => self.enqueue(entry, hints.priority),
            LoadingStrategy::Blocking => loop {
                match self.load_if_invalid(entry) {
                    Err(VolumaError::Interrupted) => {}
                    _ => break,
                }
            },
            LoadingStrategy::Budgeted => self.load_budgeted(entry, hints.priority),
        }
    }

    /// BUDGETED: enqueue, then wait out the remaining I/O budget of the
    /// calling render job at the access priority, charging the time spent.
    fn load_budgeted(&self, entry: &Arc<Entry>, priority: usize) {
        self.enqueue(entry, priority);
        let Some(context) = RenderContext::current() else {
            return;
        };
        let budget = context.budget().time_left(priority);
        if budget <= 0 {
            return;
        }
        let t0 = Instant::now();
        context.stats().start();
        {
            let mut guard = entry.load_lock.lock();
            while !entry.block.is_valid() {
                let left = budget - t0.elapsed().as_nanos() as i64;
                if left <= 0 {
                    break;
                }
                entry
                    .loaded
                    .wait_for(&mut guard, Duration::from_nanos(left as u64));
            }
        }
        context.stats().stop();
        context
            .budget()
            .use_time(t0.elapsed().as_nanos() as i64, priority);
    }
}

// ============================================================================
// Public cache handle
// ============================================================================

/// Keyed block residency table with asynchronous population.
pub struct BlockCache {
    inner: Arc<CacheInner>,
    fetchers: FetcherPool,
}

impl BlockCache {
    pub fn new(config: CacheConfig) -> Result<Arc<Self>> {
        let queue = Arc::new(BlockingPriorityQueue::new(config.num_priorities)?);
        let inner = Arc::new(CacheInner {
            table: RwLock::new(FxHashMap::default()),
            pinned: Mutex::new(Vec::new()),
            soft: Mutex::new(SoftTier {
                lru: LruCache::unbounded(),
                bytes: 0,
                ceiling: config.soft_ceiling_bytes,
            }),
            queue: Arc::clone(&queue),
            generation: AtomicU64::new(1),
        });
        let fetchers = FetcherPool::spawn(config.num_fetcher_threads, queue, &inner);
        Ok(Arc::new(Self { inner, fetchers }))
    }

    /// Returns the resident block for `key`, applying `hints` if its
    /// payload is still invalid. `None` if no entry exists.
    pub fn get_if_present(&self, key: BlockKey, hints: CacheHints) -> Option<CachedBlock> {
        let entry = self.inner.lookup(key)?;
        if entry.block.is_valid() {
            self.inner.touch(key);
        } else {
            self.inner.apply_hints(&entry, hints);
        }
        Some(CachedBlock { entry })
    }

    /// Returns the block for `key`, installing a placeholder first if no
    /// entry exists. The returned block's payload may still be invalid.
    pub fn get_or_create(
        &self,
        key: BlockKey,
        dims: [u32; 3],
        origin: [i64; 3],
        loader: &Arc<dyn BlockLoader>,
        hints: CacheHints,
    ) -> CachedBlock {
        let entry = {
            let mut table = self.inner.table.write();
            match table.get(&key).and_then(Weak::upgrade) {
                Some(live) => live,
                None => {
                    let fresh = Arc::new(Entry::new(key, dims, origin, loader));
                    table.insert(key, Arc::downgrade(&fresh));
                    fresh
                }
            }
        };
        self.inner.apply_hints(&entry, hints);
        CachedBlock { entry }
    }

    /// Frame rollover: degrade the queue to prefetch, drop the pin list,
    /// bump the generation, and purge keys whose entries have died.
    pub fn prepare_next_frame(&self) {
        self.inner.queue.clear_to_prefetch();
        self.inner.pinned.lock().clear();
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner
            .table
            .write()
            .retain(|_, weak| weak.strong_count() > 0);
    }

    /// Resets the I/O budget of the calling render job.
    pub fn init_io_budget(&self, partial: &[i64]) {
        match RenderContext::current() {
            Some(context) => context.budget().reset(partial),
            None => log::debug!("init_io_budget called outside a render context"),
        }
    }

    pub fn pause_fetchers_until(&self, deadline: Instant) {
        self.fetchers.pause_until(deadline);
    }

    pub fn wake_fetchers(&self) {
        self.fetchers.wake_up();
    }

    #[must_use]
    pub fn current_generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Keys currently waiting in the fetch queue (live lanes + prefetch).
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.queue.len()
    }

    /// The generation at which `key`'s entry was last enqueued, if the
    /// entry is resident. `u64::MAX` marks a valid entry.
    #[must_use]
    pub fn enqueue_generation(&self, key: BlockKey) -> Option<u64> {
        self.inner
            .lookup(key)
            .map(|e| e.enqueue_generation.load(Ordering::Acquire))
    }
}

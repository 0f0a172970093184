//! Per-rendering-job I/O statistics and the job context handle.
//!
//! The source of these numbers is every call that blocks on a loader: the
//! cache brackets the blocking section with [`IoStatistics::start`] /
//! [`IoStatistics::stop`]. A job-wide stopwatch runs while *any* of the
//! job's threads is inside such a section, so concurrent waits are not
//! double-counted; per-thread nesting depths make start/stop reentrant.
//!
//! # Render jobs
//!
//! A [`RenderContext`] is the logical "thread group" of the specification:
//! one per rendering job, carrying that job's statistics and its per-frame
//! [`IoTimeBudget`]. The painter installs the context on its own thread and
//! the projector installs it on every worker it dispatches; the cache picks
//! it up via [`RenderContext::current`].

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;

use crate::cache::budget::IoTimeBudget;
use crate::utils::StopWatch;

struct StatsInner {
    /// Threads currently blocked in I/O, by nesting depth.
    depths: FxHashMap<ThreadId, usize>,
    /// Number of threads with non-zero depth.
    running: usize,
    watch: StopWatch,
}

/// Aggregated blocking-I/O time and volume for one rendering job.
pub struct IoStatistics {
    inner: Mutex<StatsInner>,
    bytes: AtomicU64,
}

impl Default for IoStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl IoStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                depths: FxHashMap::default(),
                running: 0,
                watch: StopWatch::new(),
            }),
            bytes: AtomicU64::new(0),
        }
    }

    /// Marks the calling thread as blocked in I/O.
    ///
    /// The job-wide stopwatch starts when the running-thread count
    /// transitions 0 -> 1.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        let depth = inner.depths.entry(std::thread::current().id()).or_insert(0);
        *depth += 1;
        if *depth == 1 {
            inner.running += 1;
            if inner.running == 1 {
                inner.watch.start();
            }
        }
    }

    /// Symmetric to [`start`](Self::start); stops the job-wide stopwatch on
    /// the 1 -> 0 transition.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        let id = std::thread::current().id();
        let Some(depth) = inner.depths.get_mut(&id) else {
            return;
        };
        debug_assert!(*depth > 0, "unbalanced IoStatistics::stop");
        *depth -= 1;
        if *depth == 0 {
            inner.depths.remove(&id);
            inner.running -= 1;
            if inner.running == 0 {
                inner.watch.stop();
            }
        }
    }

    /// Total nanoseconds any thread of this job spent blocked in I/O.
    #[must_use]
    pub fn io_nanos(&self) -> u64 {
        self.inner.lock().watch.nanos()
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Total bytes loaded on behalf of this job.
    #[must_use]
    pub fn io_bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Render job context
// ============================================================================

thread_local! {
    static CURRENT: RefCell<Option<Arc<RenderContext>>> = const { RefCell::new(None) };
}

/// Handle identifying one rendering job across threads.
///
/// Holds the job's [`IoStatistics`] and its per-frame [`IoTimeBudget`].
/// Budgets and statistics are per-job, isolating rendering jobs from each
/// other.
pub struct RenderContext {
    stats: IoStatistics,
    budget: Mutex<IoTimeBudget>,
}

impl RenderContext {
    /// Creates a context whose budget has `num_budget_levels` priority
    /// levels (initially exhausted; reset it per frame).
    #[must_use]
    pub fn new(num_budget_levels: usize) -> Arc<Self> {
        Arc::new(Self {
            stats: IoStatistics::new(),
            budget: Mutex::new(IoTimeBudget::new(num_budget_levels)),
        })
    }

    /// Installs this context on the calling thread until the guard drops.
    /// Entering is reentrant; the previous context is restored on drop.
    pub fn enter(self: &Arc<Self>) -> ContextGuard {
        let previous = CURRENT.with(|c| c.replace(Some(Arc::clone(self))));
        ContextGuard { previous }
    }

    /// The context installed on the calling thread, if any.
    #[must_use]
    pub fn current() -> Option<Arc<Self>> {
        CURRENT.with(|c| c.borrow().clone())
    }

    #[must_use]
    pub fn stats(&self) -> &IoStatistics {
        &self.stats
    }

    /// Locks the job's I/O budget.
    pub fn budget(&self) -> MutexGuard<'_, IoTimeBudget> {
        self.budget.lock()
    }
}

/// Restores the previously installed context when dropped.
pub struct ContextGuard {
    previous: Option<Arc<RenderContext>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|c| *c.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_start_stop_single_interval() {
        let stats = IoStatistics::new();
        stats.start();
        stats.start();
        stats.stop();
        std::thread::sleep(std::time::Duration::from_millis(2));
        stats.stop();
        // The watch only stops on the outermost stop.
        assert!(stats.io_nanos() >= 2_000_000);
        let settled = stats.io_nanos();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert_eq!(stats.io_nanos(), settled);
    }

    #[test]
    fn test_context_is_thread_local_and_restored() {
        assert!(RenderContext::current().is_none());
        let ctx = RenderContext::new(1);
        {
            let _guard = ctx.enter();
            assert!(RenderContext::current().is_some());
            let worker = std::thread::spawn(|| RenderContext::current().is_none());
            assert!(worker.join().unwrap());
        }
        assert!(RenderContext::current().is_none());
    }

    #[test]
    fn test_bytes_accumulate() {
        let stats = IoStatistics::new();
        stats.add_bytes(100);
        stats.add_bytes(28);
        assert_eq!(stats.io_bytes(), 128);
    }
}

//! Background workers draining the fetch queue into the cache.
//!
//! Fetchers block on the priority queue, look the key up in the residency
//! table and load the block if it is still invalid. A shared pause gate
//! suspends all workers until an absolute deadline; paused fetchers do not
//! consume from the queue. Shutdown closes the queue and joins the workers.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::cache::block_cache::CacheInner;
use crate::cache::key::BlockKey;
use crate::cache::queue::BlockingPriorityQueue;
use crate::errors::VolumaError;

struct GateState {
    pause_until: Option<Instant>,
    shutdown: bool,
}

/// Condvar-based pause gate shared by all workers of a pool.
struct PauseGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl PauseGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                pause_until: None,
                shutdown: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Blocks while the gate is paused. Returns `false` on shutdown.
    fn wait_while_paused(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return false;
            }
            match state.pause_until {
                None => return true,
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        state.pause_until = None;
                        return true;
                    }
                    self.changed.wait_until(&mut state, deadline);
                }
            }
        }
    }

    fn pause_until(&self, deadline: Instant) {
        self.state.lock().pause_until = Some(deadline);
        self.changed.notify_all();
    }

    fn wake(&self) {
        self.state.lock().pause_until = None;
        self.changed.notify_all();
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.changed.notify_all();
    }
}

/// Fixed pool of fetcher threads.
pub(crate) struct FetcherPool {
    gate: Arc<PauseGate>,
    queue: Arc<BlockingPriorityQueue<BlockKey>>,
    workers: Vec<JoinHandle<()>>,
}

impl FetcherPool {
    pub(crate) fn spawn(
        num_threads: usize,
        queue: Arc<BlockingPriorityQueue<BlockKey>>,
        inner: &Arc<CacheInner>,
    ) -> Self {
        let gate = Arc::new(PauseGate::new());
        let workers = (0..num_threads)
            .map(|i| {
                let gate = Arc::clone(&gate);
                let queue = Arc::clone(&queue);
                let inner = Arc::clone(inner);
                std::thread::Builder::new()
                    .name(format!("voluma-fetcher-{i}"))
                    .spawn(move || worker_loop(&gate, &queue, &inner))
                    .expect("failed to spawn fetcher thread")
            })
            .collect();
        Self {
            gate,
            queue,
            workers,
        }
    }

    /// Suspends all workers until `deadline`; workers re-evaluate the gate
    /// before consuming their next key.
    pub(crate) fn pause_until(&self, deadline: Instant) {
        self.gate.pause_until(deadline);
    }

    /// Clears a pending pause and wakes all workers.
    pub(crate) fn wake_up(&self) {
        self.gate.wake();
    }
}

impl Drop for FetcherPool {
    fn drop(&mut self) {
        self.queue.close();
        self.gate.shutdown();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("fetcher thread panicked");
            }
        }
    }
}

fn worker_loop(
    gate: &PauseGate,
    queue: &BlockingPriorityQueue<BlockKey>,
    inner: &Arc<CacheInner>,
) {
    loop {
        let Some(key) = queue.take() else {
            return;
        };
        // A paused worker holds at most the one key it already took; it
        // drains nothing further until the deadline passes or wake_up.
        if !gate.wait_while_paused() {
            return;
        }
        // The entry may have been reclaimed since it was queued.
        let Some(entry) = inner.lookup(key) else {
            continue;
        };
        // An interrupted load stays invalid; the key is re-enqueued on a
        // later frame if anyone still wants it.
        if let Err(VolumaError::Interrupted) = inner.load_if_invalid(&entry) {
            log::debug!("fetcher interrupted while loading {key:?}");
        }
    }
}

//! Blocking multi-priority FIFO queue feeding the fetcher pool.
//!
//! The queue holds one FIFO lane per priority level (0 = highest) plus a
//! *prefetch shadow*: on frame rollover the live lanes are drained into the
//! shadow instead of being discarded, so enqueue decisions already paid for
//! survive into the next frame at degraded priority. `take` always serves
//! the live lanes in priority order before touching the shadow.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::errors::{Result, VolumaError};

// Internal lane state, protected by a lock.
struct Lanes<T> {
    live: Vec<VecDeque<T>>,
    prefetch: VecDeque<T>,
    closed: bool,
}

impl<T> Lanes<T> {
    fn pop(&mut self) -> Option<T> {
        for lane in &mut self.live {
            if let Some(item) = lane.pop_front() {
                return Some(item);
            }
        }
        self.prefetch.pop_front()
    }

    fn len(&self) -> usize {
        self.live.iter().map(VecDeque::len).sum::<usize>() + self.prefetch.len()
    }
}

/// Thread-safe blocking priority queue.
pub struct BlockingPriorityQueue<T> {
    lanes: Mutex<Lanes<T>>,
    available: Condvar,
}

impl<T> BlockingPriorityQueue<T> {
    pub fn new(num_priorities: usize) -> Result<Self> {
        if num_priorities == 0 {
            return Err(VolumaError::NoPriorityLanes);
        }
        let mut live = Vec::with_capacity(num_priorities);
        live.resize_with(num_priorities, VecDeque::new);
        Ok(Self {
            lanes: Mutex::new(Lanes {
                live,
                prefetch: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        })
    }

    /// Appends an item to the lane for `priority`.
    ///
    /// Priorities beyond the configured range are clamped to the lowest lane.
    pub fn put(&self, item: T, priority: usize) {
        let mut lanes = self.lanes.lock();
        if lanes.closed {
            return;
        }
        let lane = priority.min(lanes.live.len() - 1);
        lanes.live[lane].push_back(item);
        self.available.notify_one();
    }

    /// Blocks until an item is available, draining strictly in priority
    /// order. Returns `None` once the queue has been closed.
    pub fn take(&self) -> Option<T> {
        let mut lanes = self.lanes.lock();
        loop {
            if lanes.closed {
                return None;
            }
            if let Some(item) = lanes.pop() {
                return Some(item);
            }
            self.available.wait(&mut lanes);
        }
    }

    /// Atomically moves the remaining live contents to the prefetch shadow.
    ///
    /// Nothing is discarded; unserved items degrade to prefetch priority so
    /// the next frame can reprioritize without losing them.
    pub fn clear_to_prefetch(&self) {
        let mut lanes = self.lanes.lock();
        let mut carried: VecDeque<T> = VecDeque::new();
        for lane in &mut lanes.live {
            carried.append(lane);
        }
        lanes.prefetch.append(&mut carried);
    }

    /// Closes the queue; blocked and future `take`s return `None`.
    pub fn close(&self) {
        self.lanes.lock().closed = true;
        self.available.notify_all();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of items currently degraded to the prefetch shadow.
    #[must_use]
    pub fn prefetch_len(&self) -> usize {
        self.lanes.lock().prefetch.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_drains_in_priority_order() {
        let queue = BlockingPriorityQueue::new(3).unwrap();
        queue.put("low", 2);
        queue.put("high", 0);
        queue.put("mid", 1);
        assert_eq!(queue.take(), Some("high"));
        assert_eq!(queue.take(), Some("mid"));
        assert_eq!(queue.take(), Some("low"));
    }

    #[test]
    fn test_clear_degrades_to_prefetch() {
        let queue = BlockingPriorityQueue::new(2).unwrap();
        queue.put(1, 0);
        queue.put(2, 1);
        queue.clear_to_prefetch();
        assert_eq!(queue.prefetch_len(), 2);

        // Live items are served before the shadow.
        queue.put(3, 1);
        assert_eq!(queue.take(), Some(3));
        assert_eq!(queue.take(), Some(1));
        assert_eq!(queue.take(), Some(2));
    }

    #[test]
    fn test_out_of_range_priority_clamps() {
        let queue = BlockingPriorityQueue::new(2).unwrap();
        queue.put(7, 99);
        assert_eq!(queue.take(), Some(7));
    }

    #[test]
    fn test_blocking_take_wakes_on_put() {
        let queue = Arc::new(BlockingPriorityQueue::new(1).unwrap());
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.take())
        };
        std::thread::sleep(Duration::from_millis(10));
        queue.put(42, 0);
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_close_releases_blocked_takers() {
        let queue = Arc::new(BlockingPriorityQueue::<u32>::new(1).unwrap());
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.take())
        };
        std::thread::sleep(Duration::from_millis(10));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
    }
}

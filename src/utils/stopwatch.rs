use std::time::{Duration, Instant};

/// Accumulating stopwatch with pause/resume semantics.
///
/// Unlike a frame timer, a stopwatch may be started and stopped many times;
/// the reported time is the sum of all running intervals.
pub struct StopWatch {
    accumulated: Duration,
    started: Option<Instant>,
}

impl Default for StopWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl StopWatch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            accumulated: Duration::ZERO,
            started: None,
        }
    }

    /// Starts the watch. Starting a running watch is a no-op.
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    /// Stops the watch, folding the running interval into the total.
    pub fn stop(&mut self) {
        if let Some(t0) = self.started.take() {
            self.accumulated += t0.elapsed();
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Total accumulated nanoseconds, including a still-running interval.
    #[must_use]
    pub fn nanos(&self) -> u64 {
        let running = self.started.map_or(Duration::ZERO, |t0| t0.elapsed());
        (self.accumulated + running).as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_across_intervals() {
        let mut watch = StopWatch::new();
        watch.start();
        std::thread::sleep(Duration::from_millis(2));
        watch.stop();
        let after_first = watch.nanos();
        assert!(after_first >= 2_000_000);

        watch.start();
        std::thread::sleep(Duration::from_millis(2));
        watch.stop();
        assert!(watch.nanos() >= after_first + 2_000_000);
    }

    #[test]
    fn test_double_start_is_noop() {
        let mut watch = StopWatch::new();
        watch.start();
        watch.start();
        assert!(watch.is_running());
        watch.stop();
        assert!(!watch.is_running());
    }
}

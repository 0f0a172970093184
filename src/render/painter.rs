//! Painter thread: the single place where `paint` runs.
//!
//! Repaint requests from any thread land in a [`RepaintSignal`]; the
//! painter coalesces them (many requests while a frame is in flight
//! collapse into one) and calls the paint closure serially, which keeps a
//! single presentation order on the canvas.

use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

struct SignalState {
    pending: bool,
    shutdown: bool,
}

struct SignalInner {
    state: Mutex<SignalState>,
    changed: Condvar,
}

/// Coalescing repaint request channel.
#[derive(Clone)]
pub struct RepaintSignal {
    inner: std::sync::Arc<SignalInner>,
}

impl Default for RepaintSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl RepaintSignal {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new(SignalInner {
                state: Mutex::new(SignalState {
                    pending: false,
                    shutdown: false,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// Requests a repaint. Cheap and callable from any thread.
    pub fn notify(&self) {
        self.inner.state.lock().pending = true;
        self.inner.changed.notify_all();
    }

    /// Blocks until a repaint is pending, consuming it. `false` on
    /// shutdown.
    fn wait(&self) -> bool {
        let mut state = self.inner.state.lock();
        loop {
            if state.shutdown {
                return false;
            }
            if state.pending {
                state.pending = false;
                return true;
            }
            self.inner.changed.wait(&mut state);
        }
    }

    fn shutdown(&self) {
        self.inner.state.lock().shutdown = true;
        self.inner.changed.notify_all();
    }
}

/// Dedicated thread driving a paint closure off a [`RepaintSignal`].
pub struct PainterThread {
    signal: RepaintSignal,
    worker: Option<JoinHandle<()>>,
}

impl PainterThread {
    /// Spawns the painter. `paint` is called once per coalesced request.
    pub fn spawn<F>(signal: RepaintSignal, mut paint: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let wait_signal = signal.clone();
        let worker = std::thread::Builder::new()
            .name("voluma-painter".into())
            .spawn(move || {
                while wait_signal.wait() {
                    paint();
                }
            })
            .expect("failed to spawn painter thread");
        Self {
            signal,
            worker: Some(worker),
        }
    }

    #[must_use]
    pub fn signal(&self) -> &RepaintSignal {
        &self.signal
    }
}

impl Drop for PainterThread {
    fn drop(&mut self) {
        self.signal.shutdown();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("painter thread panicked");
            }
        }
    }
}

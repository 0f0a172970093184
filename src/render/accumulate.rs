//! Accumulating projector over multiple sources.
//!
//! Each visible source renders into its own image through its own
//! projector; this projector then sums the per-source ARGB channels into
//! the screen image with saturation to 255. Success requires every
//! sub-projector to succeed, and cancellation is propagated down.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crate::render::image::{SharedImage, saturating_add_argb};
use crate::render::projector::Projector;

pub struct AccumulateProjector {
    /// Per-source projector and the image it renders into.
    parts: Vec<(Projector, SharedImage)>,
    target: SharedImage,
    num_tasks: usize,
    canceled: AtomicBool,
    last_frame_nanos: AtomicU64,
}

impl AccumulateProjector {
    #[must_use]
    pub fn new(parts: Vec<(Projector, SharedImage)>, target: SharedImage, num_threads: usize) -> Self {
        Self {
            parts,
            target,
            num_tasks: num_threads.max(1),
            canceled: AtomicBool::new(false),
            last_frame_nanos: AtomicU64::new(0),
        }
    }

    pub fn map(&self, clear_untouched: bool) -> bool {
        self.canceled.store(false, Ordering::Relaxed);
        let t0 = Instant::now();

        for (projector, _) in &self.parts {
            if !projector.map(clear_untouched) {
                return false;
            }
            if self.canceled.load(Ordering::Relaxed) {
                return false;
            }
        }

        let guards: Vec<_> = self.parts.iter().map(|(_, image)| image.read()).collect();
        let planes: Vec<&[u32]> = guards.iter().map(|g| g.pixels()).collect();
        let mut out = self.target.write();
        let width = out.width() as usize;
        let height = out.height() as usize;
        if width == 0 || height == 0 {
            return true;
        }
        let rows_per_task = height.div_ceil(self.num_tasks).max(1);
        let chunk = rows_per_task * width;
        let canceled = &self.canceled;
        let planes = &planes;

        std::thread::scope(|scope| {
            for (task, pixels) in out.pixels_mut().chunks_mut(chunk).enumerate() {
                let mut run = move || {
                    let offset = task * chunk;
                    for (row, pixel_row) in pixels.chunks_mut(width).enumerate() {
                        if canceled.load(Ordering::Relaxed) {
                            break;
                        }
                        let row_offset = offset + row * width;
                        for (x, pixel) in pixel_row.iter_mut().enumerate() {
                            let mut sum = 0u32;
                            for plane in planes {
                                sum = saturating_add_argb(sum, plane[row_offset + x]);
                            }
                            *pixel = sum;
                        }
                    }
                };
                if self.num_tasks == 1 {
                    run();
                } else {
                    scope.spawn(run);
                }
            }
        });

        if self.canceled.load(Ordering::Relaxed) {
            return false;
        }
        self.last_frame_nanos
            .store(t0.elapsed().as_nanos() as u64, Ordering::Relaxed);
        true
    }

    /// Cancels the accumulation and every sub-projector.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
        for (projector, _) in &self.parts {
            projector.cancel();
        }
    }

    /// Valid once every sub-projector is.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.parts.iter().all(|(projector, _)| projector.is_valid())
    }

    #[must_use]
    pub fn last_frame_nanos(&self) -> u64 {
        self.last_frame_nanos.load(Ordering::Relaxed)
    }
}

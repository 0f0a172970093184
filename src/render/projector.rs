//! Projector variants.
//!
//! Every way of producing a render image shares one small contract:
//! `map(clear_untouched) -> bool` (false when cancelled), `cancel`,
//! `is_valid` and `last_frame_nanos`. Rather than dynamic dispatch, the
//! renderer works with a tagged [`Projector`] variant:
//!
//! - [`EmptyProjector`]: no visible sources, clears the target
//! - [`SingleProjector`]: one non-volatile source, single full pass
//! - [`VolatileHierarchicalProjector`]: mask-driven multi-level compositing
//! - [`AccumulateProjector`]: per-source projectors summed into the target

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use glam::{DMat4, DVec3};

use crate::cache::RenderContext;
use crate::render::accumulate::AccumulateProjector;
use crate::render::hierarchical::VolatileHierarchicalProjector;
use crate::render::image::{ArgbConverter, SharedImage};
use crate::volume::sampler::VolatileSampler;

/// Tagged projector variant shared by the renderer.
pub enum Projector {
    Empty(EmptyProjector),
    Single(SingleProjector),
    Hierarchical(VolatileHierarchicalProjector),
    Accumulate(AccumulateProjector),
}

impl Projector {
    /// Renders one frame's worth of work into the target image.
    ///
    /// Returns `false` when cancelled; a cancelled map leaves `is_valid`
    /// untouched and publishes nothing.
    pub fn map(&self, clear_untouched: bool) -> bool {
        match self {
            Projector::Empty(p) => p.map(),
            Projector::Single(p) => p.map(),
            Projector::Hierarchical(p) => p.map(clear_untouched),
            Projector::Accumulate(p) => p.map(clear_untouched),
        }
    }

    /// Asks a running `map` to stop at the next row boundary.
    pub fn cancel(&self) {
        match self {
            Projector::Empty(_) => {}
            Projector::Single(p) => p.cancel(),
            Projector::Hierarchical(p) => p.cancel(),
            Projector::Accumulate(p) => p.cancel(),
        }
    }

    /// Sticky: once a map covered every pixel with best-level data.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self {
            Projector::Empty(_) => true,
            Projector::Single(p) => p.is_valid(),
            Projector::Hierarchical(p) => p.is_valid(),
            Projector::Accumulate(p) => p.is_valid(),
        }
    }

    /// Wall-clock nanoseconds of the last successful map.
    #[must_use]
    pub fn last_frame_nanos(&self) -> u64 {
        match self {
            Projector::Empty(p) => p.last_frame_nanos(),
            Projector::Single(p) => p.last_frame_nanos(),
            Projector::Hierarchical(p) => p.last_frame_nanos(),
            Projector::Accumulate(p) => p.last_frame_nanos(),
        }
    }
}

// ============================================================================
// EmptyProjector
// ============================================================================

/// Clears the target; stands in when no source is visible.
pub struct EmptyProjector {
    target: SharedImage,
    last_frame_nanos: AtomicU64,
}

impl EmptyProjector {
    #[must_use]
    pub fn new(target: SharedImage) -> Self {
        Self {
            target,
            last_frame_nanos: AtomicU64::new(0),
        }
    }

    pub fn map(&self) -> bool {
        let t0 = Instant::now();
        self.target.write().clear();
        self.last_frame_nanos
            .store(t0.elapsed().as_nanos() as u64, Ordering::Relaxed);
        true
    }

    #[must_use]
    pub fn last_frame_nanos(&self) -> u64 {
        self.last_frame_nanos.load(Ordering::Relaxed)
    }
}

// ============================================================================
// SingleProjector
// ============================================================================

/// Single full pass over one source at one level.
///
/// Used for sources without a volatile variant: every pixel is written,
/// pending samples degrade to black instead of falling through to a
/// coarser level.
pub struct SingleProjector {
    sampler: Arc<dyn VolatileSampler>,
    screen_to_source: DMat4,
    converter: ArgbConverter,
    target: SharedImage,
    num_tasks: usize,
    context: Option<Arc<RenderContext>>,
    canceled: AtomicBool,
    valid: AtomicBool,
    last_frame_nanos: AtomicU64,
}

impl SingleProjector {
    #[must_use]
    pub fn new(
        sampler: Arc<dyn VolatileSampler>,
        screen_to_source: DMat4,
        converter: ArgbConverter,
        target: SharedImage,
        num_threads: usize,
        context: Option<Arc<RenderContext>>,
    ) -> Self {
        Self {
            sampler,
            screen_to_source,
            converter,
            target,
            num_tasks: num_threads.max(1),
            context,
            canceled: AtomicBool::new(false),
            valid: AtomicBool::new(false),
            last_frame_nanos: AtomicU64::new(0),
        }
    }

    pub fn map(&self) -> bool {
        self.canceled.store(false, Ordering::Relaxed);
        let t0 = Instant::now();
        let mut image = self.target.write();
        let width = image.width() as usize;
        let height = image.height() as usize;
        if width == 0 || height == 0 {
            self.valid.store(true, Ordering::Release);
            return true;
        }
        let rows_per_task = height.div_ceil(self.num_tasks).max(1);
        let chunk = rows_per_task * width;
        let canceled = &self.canceled;
        let convert = self.converter.as_ref();
        let sampler = self.sampler.as_ref();
        let transform = self.screen_to_source;

        std::thread::scope(|scope| {
            for (task, pixels) in image.pixels_mut().chunks_mut(chunk).enumerate() {
                let context = self.context.clone();
                let mut run = move || {
                    let _guard = context.as_ref().map(RenderContext::enter);
                    for (row, pixel_row) in pixels.chunks_mut(width).enumerate() {
                        if canceled.load(Ordering::Relaxed) {
                            break;
                        }
                        let y = (task * rows_per_task + row) as f64;
                        for (x, pixel) in pixel_row.iter_mut().enumerate() {
                            let position =
                                transform.transform_point3(DVec3::new(x as f64, y, 0.0));
                            let sample = sampler.sample(position);
                            *pixel = if sample.valid { convert(sample.value) } else { 0 };
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
        self.valid.store(true, Ordering::Release);
        self.last_frame_nanos
            .store(t0.elapsed().as_nanos() as u64, Ordering::Relaxed);
        true
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn last_frame_nanos(&self) -> u64 {
        self.last_frame_nanos.load(Ordering::Relaxed)
    }
}

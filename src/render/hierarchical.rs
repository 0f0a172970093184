//! Mask-driven hierarchical projection across mipmap levels.
//!
//! One `map` call walks the supplied levels from finest to coarsest. A
//! per-pixel mask records the finest pass that has contributed a valid
//! sample (`0` = best level, `n` = untouched); each pass only writes pixels
//! whose mask is still coarser than the pass. Pixels whose sample is
//! pending are left for the next coarser level, and for the next `map`
//! call: the mask persists, so repeated maps over the same target converge
//! monotonically toward best-level data as blocks arrive.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use glam::{DMat4, DVec3};
use parking_lot::Mutex;

use crate::cache::RenderContext;
use crate::render::image::{ArgbConverter, ArgbImage, SharedImage};
use crate::volume::sampler::VolatileSampler;

/// One mipmap level as a projector pass: its sampler and the transform
/// from render-image pixels to source voxel coordinates.
pub struct LevelSource {
    pub sampler: Arc<dyn VolatileSampler>,
    pub screen_to_source: DMat4,
    /// Mipmap level this pass reads; diagnostics only.
    pub level: usize,
}

pub struct VolatileHierarchicalProjector {
    /// Passes from finest supplied level to coarsest.
    sources: Vec<LevelSource>,
    converter: ArgbConverter,
    target: SharedImage,
    /// Finest pass index that contributed per pixel; `sources.len()` means
    /// untouched.
    mask: Mutex<Vec<u8>>,
    num_tasks: usize,
    context: Option<Arc<RenderContext>>,
    canceled: AtomicBool,
    valid: AtomicBool,
    last_frame_nanos: AtomicU64,
}

impl VolatileHierarchicalProjector {
    #[must_use]
    pub fn new(
        sources: Vec<LevelSource>,
        converter: ArgbConverter,
        target: SharedImage,
        num_threads: usize,
        context: Option<Arc<RenderContext>>,
    ) -> Self {
        debug_assert!(!sources.is_empty());
        debug_assert!(sources.len() < usize::from(u8::MAX));
        let len = {
            let image = target.read();
            image.width() as usize * image.height() as usize
        };
        let untouched = sources.len() as u8;
        Self {
            sources,
            converter,
            target,
            mask: Mutex::new(vec![untouched; len]),
            num_tasks: num_threads.max(1),
            context,
            canceled: AtomicBool::new(false),
            valid: AtomicBool::new(false),
            last_frame_nanos: AtomicU64::new(0),
        }
    }

    /// One coarse-to-fine refinement step: passes over the supplied levels
    /// until every pixel carries best-level data, the levels are exhausted
    /// (partially valid; call again on a later frame), or `cancel` fires.
    pub fn map(&self, clear_untouched: bool) -> bool {
        self.canceled.store(false, Ordering::Relaxed);
        let t0 = Instant::now();
        let mut image = self.target.write();
        let mut mask = self.mask.lock();
        debug_assert_eq!(mask.len(), image.pixels().len());

        let mut unresolved = usize::MAX;
        for pass in 0..self.sources.len() {
            match self.map_pass(pass, &mut image, &mut mask) {
                Some(n) => {
                    unresolved = n;
                    if n == 0 {
                        break;
                    }
                }
                None => return false,
            }
        }
        if unresolved == 0 {
            self.valid.store(true, Ordering::Release);
        }
        if clear_untouched {
            let untouched = self.sources.len() as u8;
            for (pixel, mark) in image.pixels_mut().iter_mut().zip(mask.iter()) {
                if *mark == untouched {
                    *pixel = 0;
                }
            }
        }
        self.last_frame_nanos
            .store(t0.elapsed().as_nanos() as u64, Ordering::Relaxed);
        log::trace!(
            "hierarchical map: {} levels, {} unresolved",
            self.sources.len(),
            unresolved
        );
        true
    }

    /// Runs one pass; returns the number of pixels still below best level,
    /// or `None` when cancelled.
    fn map_pass(&self, pass: usize, image: &mut ArgbImage, mask: &mut [u8]) -> Option<usize> {
        let width = image.width() as usize;
        let height = image.height() as usize;
        if width == 0 || height == 0 {
            return Some(0);
        }
        let source = &self.sources[pass];
        let pass_mark = pass as u8;
        let rows_per_task = height.div_ceil(self.num_tasks).max(1);
        let chunk = rows_per_task * width;
        let unresolved = AtomicUsize::new(0);
        let canceled = &self.canceled;
        let convert = self.converter.as_ref();

        std::thread::scope(|scope| {
            let pixel_chunks = image.pixels_mut().chunks_mut(chunk);
            let mark_chunks = mask.chunks_mut(chunk);
            for (task, (pixels, marks)) in pixel_chunks.zip(mark_chunks).enumerate() {
                let context = self.context.clone();
                let unresolved = &unresolved;
                let mut run = move || {
                    let _guard = context.as_ref().map(RenderContext::enter);
                    let mut pending = 0usize;
                    for (row, (pixel_row, mark_row)) in pixels
                        .chunks_mut(width)
                        .zip(marks.chunks_mut(width))
                        .enumerate()
                    {
                        if canceled.load(Ordering::Relaxed) {
                            break;
                        }
                        let y = (task * rows_per_task + row) as f64;
                        for (x, (pixel, mark)) in
                            pixel_row.iter_mut().zip(mark_row.iter_mut()).enumerate()
                        {
                            if *mark > pass_mark {
                                let position = source
                                    .screen_to_source
                                    .transform_point3(DVec3::new(x as f64, y, 0.0));
                                let sample = source.sampler.sample(position);
                                if sample.valid {
                                    *pixel = convert(sample.value);
                                    *mark = pass_mark;
                                }
                            }
                            if *mark != 0 {
                                pending += 1;
                            }
                        }
                    }
                    unresolved.fetch_add(pending, Ordering::Relaxed);
                };
                if self.num_tasks == 1 {
                    run();
                } else {
                    scope.spawn(run);
                }
            }
        });

        if self.canceled.load(Ordering::Relaxed) {
            None
        } else {
            Some(unresolved.load(Ordering::Relaxed))
        }
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

    /// Number of level passes this projector was built with.
    #[must_use]
    pub fn num_pass_levels(&self) -> usize {
        self.sources.len()
    }

    /// Copy of the per-pixel mask; diagnostics and tests.
    #[must_use]
    pub fn mask_snapshot(&self) -> Vec<u8> {
        self.mask.lock().clone()
    }
}

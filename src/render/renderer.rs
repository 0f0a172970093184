//! Coarse-to-fine multi-resolution renderer.
//!
//! `paint` renders the viewer state at one entry of the screen-scale
//! ladder, publishes the image, and requests itself again at the next
//! finer scale (or at the same scale while volatile data is still
//! arriving). The starting entry adapts to the measured frame time so a
//! target per-frame rendering time is preserved: overload coarsens, idle
//! headroom refines. Under sustained load the renderer may stay coarse;
//! that is the intended trade.
//!
//! # Buffering
//!
//! With `double_buffered` three images are allocated per scale and rotated
//! through a render-id queue: a fresh projector always writes an image
//! that is not currently displayed, and publishing recycles the previously
//! displayed buffer. Re-maps of an existing projector refine its already
//! published image in place.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::{DMat4, DVec3};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::cache::{BlockCache, RenderContext};
use crate::errors::Result;
use crate::render::accumulate::AccumulateProjector;
use crate::render::hierarchical::{LevelSource, VolatileHierarchicalProjector};
use crate::render::image::{RenderTarget, SharedImage, shared_image};
use crate::render::painter::RepaintSignal;
use crate::render::projector::{EmptyProjector, Projector, SingleProjector};
use crate::render::settings::RendererConfig;
use crate::viewer::{RenderSource, ViewerState};

/// Images rotated per scale when double buffering is on.
const NUM_RENDER_IDS: usize = 3;

struct RenderState {
    /// Per scale, the rotation images (three, or one when not double
    /// buffered).
    screen_images: Vec<Vec<SharedImage>>,
    /// Image pointer -> rotation slot, for recycling published buffers.
    image_slots: FxHashMap<usize, usize>,
    /// FIFO of rotation slots; the head is the next render target.
    render_ids: VecDeque<usize>,
    /// Canvas-to-render-image transform per scale.
    scale_transforms: Vec<DMat4>,
    /// Per-source render images when accumulating several sources.
    source_images: Vec<SharedImage>,
    canvas_width: u32,
    canvas_height: u32,
    current_scale: usize,
    requested_scale: usize,
    /// Adaptive coarsest starting index of the ladder.
    max_scale: usize,
    new_frame_request: bool,
    may_be_cancelled: bool,
    previous_timepoint: Option<u32>,
    /// Image chosen at projector creation, published on success.
    pending_publish: Option<SharedImage>,
}

/// Adaptive coarse-to-fine renderer over a screen-scale ladder.
pub struct MultiResolutionRenderer {
    target: Arc<dyn RenderTarget>,
    signal: RepaintSignal,
    cache: Arc<BlockCache>,
    context: Arc<RenderContext>,
    screen_scales: Vec<f64>,
    target_render_nanos: u64,
    double_buffered: bool,
    num_rendering_threads: usize,
    use_volatile_if_available: bool,
    io_budget: Vec<i64>,
    state: Mutex<RenderState>,
    projector: Mutex<Option<Arc<Projector>>>,
}

impl MultiResolutionRenderer {
    pub fn new(
        target: Arc<dyn RenderTarget>,
        signal: RepaintSignal,
        cache: Arc<BlockCache>,
        config: RendererConfig,
    ) -> Result<Self> {
        config.validate()?;
        let max_scale = config.screen_scales.len() - 1;
        Ok(Self {
            target,
            signal,
            cache,
            context: RenderContext::new(config.io_budget_per_frame.len()),
            screen_scales: config.screen_scales,
            target_render_nanos: config.target_render_nanos,
            double_buffered: config.double_buffered,
            num_rendering_threads: config.num_rendering_threads,
            use_volatile_if_available: config.use_volatile_if_available,
            io_budget: config.io_budget_per_frame,
            state: Mutex::new(RenderState {
                screen_images: Vec::new(),
                image_slots: FxHashMap::default(),
                render_ids: VecDeque::new(),
                scale_transforms: Vec::new(),
                source_images: Vec::new(),
                canvas_width: 0,
                canvas_height: 0,
                current_scale: max_scale,
                requested_scale: max_scale,
                max_scale,
                new_frame_request: true,
                may_be_cancelled: false,
                previous_timepoint: None,
                pending_publish: None,
            }),
            projector: Mutex::new(None),
        })
    }

    // ========================================================================
    // Repaint requests
    // ========================================================================

    /// Requests a full repaint: new frame, starting at the adaptive
    /// coarsest scale. Call after the viewer transform, timepoint or
    /// visibility changed.
    pub fn request_repaint(&self) {
        {
            let mut state = self.state.lock();
            self.cancel_if_allowed(&state);
            state.new_frame_request = true;
            state.requested_scale = state.max_scale;
        }
        self.signal.notify();
    }

    /// Requests a repaint at an explicit ladder index (used internally to
    /// walk toward full resolution).
    pub fn request_repaint_at(&self, scale: usize) {
        {
            let mut state = self.state.lock();
            self.cancel_if_allowed(&state);
            state.requested_scale = scale.min(self.screen_scales.len() - 1);
        }
        self.signal.notify();
    }

    fn cancel_if_allowed(&self, state: &RenderState) {
        if state.may_be_cancelled {
            if let Some(projector) = self.projector.lock().as_ref() {
                projector.cancel();
            }
        }
    }

    // ========================================================================
    // Painting
    // ========================================================================

    /// Renders one step of the coarse-to-fine ladder. Returns `false` when
    /// nothing was rendered (empty canvas or cancellation); the next
    /// repaint request recovers.
    pub fn paint(&self, viewer: &ViewerState) -> bool {
        let canvas_width = self.target.width();
        let canvas_height = self.target.height();
        if canvas_width == 0 || canvas_height == 0 {
            return false;
        }
        let _job = self.context.enter();

        let (projector, created) = {
            let mut state = self.state.lock();
            let resized =
                state.canvas_width != canvas_width || state.canvas_height != canvas_height;
            if resized {
                self.rebuild_buffers(&mut state, canvas_width, canvas_height);
            }
            let new_frame = std::mem::take(&mut state.new_frame_request);
            if new_frame {
                state.requested_scale = state.max_scale;
                self.cache.prepare_next_frame();
                self.cache.init_io_budget(&self.io_budget);
            }
            state.may_be_cancelled = state.requested_scale < state.max_scale;

            let mut slot = self.projector.lock();
            let created =
                new_frame || resized || state.requested_scale != state.current_scale
                    || slot.is_none();
            state.current_scale = state.requested_scale;
            if created {
                let timepoint_changed = state.previous_timepoint != Some(viewer.timepoint);
                let projector = self.create_projector(&mut state, viewer, timepoint_changed);
                state.previous_timepoint = Some(viewer.timepoint);
                if timepoint_changed {
                    // Only best and coarsest level are rendered now; force
                    // a full frame right after.
                    state.new_frame_request = true;
                }
                *slot = Some(Arc::new(projector));
            }
            match slot.as_ref() {
                Some(projector) => (Arc::clone(projector), created),
                None => return false,
            }
        };

        let t0 = Instant::now();
        let success = projector.map(created);
        let rendertime = t0.elapsed().as_nanos() as u64;
        if !success {
            log::trace!("paint cancelled after {rendertime} ns");
            return false;
        }

        let (current_scale, projector_valid) = {
            let mut state = self.state.lock();
            if created {
                if let Some(image) = state.pending_publish.take() {
                    let recycled = self.target.set_image(Arc::clone(&image));
                    if self.double_buffered {
                        state.render_ids.pop_front();
                        if let Some(previous) = recycled {
                            let pointer = Arc::as_ptr(&previous).cast::<()>() as usize;
                            if let Some(&id) = state.image_slots.get(&pointer) {
                                state.render_ids.push_back(id);
                            }
                        }
                    }
                }
            }
            self.adapt_max_scale(&mut state, rendertime);
            (state.current_scale, projector.is_valid())
        };

        if current_scale > 0 {
            self.request_repaint_at(current_scale - 1);
        } else if !projector_valid {
            // Full scale but volatile data is still arriving; give the
            // fetchers a moment and try the same scale again.
            std::thread::sleep(Duration::from_millis(1));
            self.request_repaint_at(current_scale);
        }
        true
    }

    /// Frame-time feedback on the coarsest starting index.
    fn adapt_max_scale(&self, state: &mut RenderState, rendertime: u64) {
        let coarsest = self.screen_scales.len() - 1;
        if state.current_scale == state.max_scale {
            if rendertime > self.target_render_nanos && state.max_scale < coarsest {
                state.max_scale += 1;
            } else if rendertime < self.target_render_nanos / 3 && state.max_scale > 0 {
                state.max_scale -= 1;
            }
        } else if state.max_scale > 0
            && state.current_scale == state.max_scale - 1
            && rendertime < self.target_render_nanos
        {
            state.max_scale -= 1;
        }
        log::trace!(
            "rendertime {} ns at scale {}, start index now {}",
            rendertime,
            state.current_scale,
            state.max_scale
        );
    }

    // ========================================================================
    // Buffers and projector construction
    // ========================================================================

    fn rebuild_buffers(&self, state: &mut RenderState, canvas_width: u32, canvas_height: u32) {
        let slots = if self.double_buffered { NUM_RENDER_IDS } else { 1 };
        state.screen_images.clear();
        state.image_slots.clear();
        state.scale_transforms.clear();
        for &scale in &self.screen_scales {
            let width = ((f64::from(canvas_width) * scale).ceil() as u32).max(1);
            let height = ((f64::from(canvas_height) * scale).ceil() as u32).max(1);
            let images: Vec<SharedImage> =
                (0..slots).map(|_| shared_image(width, height)).collect();
            for (slot, image) in images.iter().enumerate() {
                let pointer = Arc::as_ptr(image).cast::<()>() as usize;
                state.image_slots.insert(pointer, slot);
            }
            state.screen_images.push(images);
            // Half-pixel centering keeps scaled images aligned with the
            // canvas pixel grid.
            let shift = 0.5 * scale - 0.5;
            state.scale_transforms.push(
                DMat4::from_translation(DVec3::new(shift, shift, 0.0))
                    * DMat4::from_scale(DVec3::new(scale, scale, 1.0)),
            );
        }
        state.render_ids = (0..slots).collect();
        state.source_images.clear();
        state.canvas_width = canvas_width;
        state.canvas_height = canvas_height;
        // In-flight output targets stale buffers; restart coarse.
        state.requested_scale = state.max_scale;
    }

    fn create_projector(
        &self,
        state: &mut RenderState,
        viewer: &ViewerState,
        restrict_levels: bool,
    ) -> Projector {
        let scale = state.current_scale;
        let slot = if self.double_buffered {
            state.render_ids.front().copied().unwrap_or(0)
        } else {
            0
        };
        let image = Arc::clone(&state.screen_images[scale][slot]);
        state.pending_publish = Some(Arc::clone(&image));
        let screen_transform = state.scale_transforms[scale];

        match viewer.sources.len() {
            0 => Projector::Empty(EmptyProjector::new(image)),
            1 => self.source_projector(
                &viewer.sources[0],
                viewer,
                &screen_transform,
                restrict_levels,
                image,
            ),
            count => {
                let (width, height) = {
                    let guard = image.read();
                    (guard.width(), guard.height())
                };
                let stale = state.source_images.len() != count
                    || state
                        .source_images
                        .first()
                        .is_some_and(|img| {
                            let guard = img.read();
                            guard.width() != width || guard.height() != height
                        });
                if stale {
                    state.source_images =
                        (0..count).map(|_| shared_image(width, height)).collect();
                }
                let parts = viewer
                    .sources
                    .iter()
                    .zip(&state.source_images)
                    .map(|(source, source_image)| {
                        let projector = self.source_projector(
                            source,
                            viewer,
                            &screen_transform,
                            restrict_levels,
                            Arc::clone(source_image),
                        );
                        (projector, Arc::clone(source_image))
                    })
                    .collect();
                Projector::Accumulate(AccumulateProjector::new(
                    parts,
                    image,
                    self.num_rendering_threads,
                ))
            }
        }
    }

    /// Projector for one source: hierarchical over `best..=coarsest` when
    /// volatile, single-pass at the best level otherwise. On a timepoint
    /// change only best and coarsest are passed, skipping intermediate
    /// levels that are certain to miss.
    fn source_projector(
        &self,
        source: &Arc<dyn RenderSource>,
        viewer: &ViewerState,
        screen_transform: &DMat4,
        restrict_levels: bool,
        target: SharedImage,
    ) -> Projector {
        let timepoint = viewer.timepoint;
        let coarsest = source.num_levels() - 1;
        let best = source.best_level(viewer, screen_transform).min(coarsest);
        let screen_to_source = |level: usize| {
            (*screen_transform * viewer.transform * source.transform(timepoint, level)).inverse()
        };

        if self.use_volatile_if_available && source.is_volatile() {
            let levels: SmallVec<[usize; 8]> = if restrict_levels && coarsest > best {
                SmallVec::from_slice(&[best, coarsest])
            } else {
                (best..=coarsest).collect()
            };
            let sources = levels
                .iter()
                .map(|&level| LevelSource {
                    sampler: source.sampler(timepoint, level, viewer.interpolation),
                    screen_to_source: screen_to_source(level),
                    level,
                })
                .collect();
            Projector::Hierarchical(VolatileHierarchicalProjector::new(
                sources,
                source.converter(),
                target,
                self.num_rendering_threads,
                Some(Arc::clone(&self.context)),
            ))
        } else {
            Projector::Single(SingleProjector::new(
                source.sampler(timepoint, best, viewer.interpolation),
                screen_to_source(best),
                source.converter(),
                target,
                self.num_rendering_threads,
                Some(Arc::clone(&self.context)),
            ))
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Current adaptive coarsest starting index of the ladder.
    #[must_use]
    pub fn max_scale_index(&self) -> usize {
        self.state.lock().max_scale
    }

    #[must_use]
    pub fn requested_scale_index(&self) -> usize {
        self.state.lock().requested_scale
    }

    #[must_use]
    pub fn current_scale_index(&self) -> usize {
        self.state.lock().current_scale
    }

    /// The rendering-job context carrying I/O statistics and budget.
    #[must_use]
    pub fn render_context(&self) -> &Arc<RenderContext> {
        &self.context
    }

    #[must_use]
    pub fn screen_scales(&self) -> &[f64] {
        &self.screen_scales
    }
}

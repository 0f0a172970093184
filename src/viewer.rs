//! Viewer-state snapshot and the render-source seam.
//!
//! The renderer consumes an immutable per-frame snapshot of what the
//! viewer wants to see. Sources are behind the [`RenderSource`] trait:
//! everything the projector needs from a multi-resolution volume without
//! knowing how its data is stored.

use std::sync::Arc;

use glam::DMat4;

use crate::render::image::ArgbConverter;
use crate::volume::sampler::VolatileSampler;

/// Interpolation applied when sampling a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    NearestNeighbor,
    NLinear,
}

/// One multi-resolution source as seen by the renderer.
pub trait RenderSource: Send + Sync {
    /// Number of mipmap levels; level 0 is the finest.
    fn num_levels(&self) -> usize;

    /// The coarsest mipmap level whose projected voxel footprint is still
    /// at most one pixel under `screen_transform`.
    fn best_level(&self, viewer: &ViewerState, screen_transform: &DMat4) -> usize;

    /// Source-to-global transform of `level` at `timepoint`.
    fn transform(&self, timepoint: u32, level: usize) -> DMat4;

    /// A continuous sampler of `level` at `timepoint`.
    fn sampler(
        &self,
        timepoint: u32,
        level: usize,
        interpolation: Interpolation,
    ) -> Arc<dyn VolatileSampler>;

    /// Whether the source serves volatile (asynchronously populated) data.
    /// Non-volatile sources are rendered single-pass at the best level.
    fn is_volatile(&self) -> bool {
        true
    }

    /// Intensity-to-ARGB conversion for this source.
    fn converter(&self) -> ArgbConverter;
}

/// Immutable snapshot of the viewer for one frame.
#[derive(Clone)]
pub struct ViewerState {
    /// Current timepoint.
    pub timepoint: u32,
    /// Global-to-viewer affine transform.
    pub transform: DMat4,
    /// Visible sources in render order.
    pub sources: Vec<Arc<dyn RenderSource>>,
    /// Interpolation used for sampling.
    pub interpolation: Interpolation,
}

impl ViewerState {
    #[must_use]
    pub fn new(timepoint: u32, transform: DMat4, sources: Vec<Arc<dyn RenderSource>>) -> Self {
        Self {
            timepoint,
            transform,
            sources,
            interpolation: Interpolation::NearestNeighbor,
        }
    }
}

//! Renderer Configuration
//!
//! This module defines the configuration options for the multi-resolution
//! renderer.
//!
//! # Fields
//!
//! | Field | Description | Default |
//! |-------|-------------|---------|
//! | `screen_scales` | Coarse-to-fine screen-scale ladder | `[1.0, 0.75, 0.5, 0.25, 0.125]` |
//! | `target_render_nanos` | Frame-time target of the adaptive controller | 30 ms |
//! | `double_buffered` | Rotate three images per scale | `true` |
//! | `num_rendering_threads` | Projector worker threads (`0` = inline) | `3` |
//! | `use_volatile_if_available` | Hierarchical projection for volatile sources | `true` |
//! | `io_budget_per_frame` | Blocking-I/O nanoseconds per priority level | `[100 ms, 10 ms]` |

use crate::errors::{Result, VolumaError};

/// Configuration options for [`MultiResolutionRenderer`].
///
/// [`MultiResolutionRenderer`]: super::renderer::MultiResolutionRenderer
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Screen-scale ladder, strictly descending, first entry at most 1.0.
    ///
    /// Rendering starts at an adaptively chosen coarse entry and walks
    /// toward index 0 (full resolution).
    pub screen_scales: Vec<f64>,

    /// Per-frame rendering time the adaptive controller steers toward.
    ///
    /// Frames slower than this push the starting scale coarser; frames
    /// faster than a third of it pull it finer.
    pub target_render_nanos: u64,

    /// When `true`, three images are allocated per scale and rotated so
    /// the displayed image is never the one a fresh projector writes (the
    /// name is historical; the rotation is triple-buffered). When `false`,
    /// a single image per scale is written in place.
    pub double_buffered: bool,

    /// Worker threads per projector pass. `0` runs passes inline on the
    /// painter thread.
    pub num_rendering_threads: usize,

    /// Use the hierarchical volatile projector for sources that advertise
    /// a volatile variant; otherwise render single-pass at the best level.
    pub use_volatile_if_available: bool,

    /// Per-frame blocking-I/O budget in nanoseconds, one entry per
    /// priority level, monotone non-increasing.
    pub io_budget_per_frame: Vec<i64>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            screen_scales: vec![1.0, 0.75, 0.5, 0.25, 0.125],
            target_render_nanos: 30_000_000,
            double_buffered: true,
            num_rendering_threads: 3,
            use_volatile_if_available: true,
            io_budget_per_frame: vec![100_000_000, 10_000_000],
        }
    }
}

impl RendererConfig {
    /// Rejects configurations the renderer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.screen_scales.is_empty() {
            return Err(VolumaError::EmptyScaleLadder);
        }
        let descending = self
            .screen_scales
            .windows(2)
            .all(|pair| pair[1] < pair[0]);
        if self.screen_scales[0] > 1.0 || !descending {
            return Err(VolumaError::InvalidScaleLadder(self.screen_scales.clone()));
        }
        if self.io_budget_per_frame.is_empty() {
            return Err(VolumaError::EmptyIoBudget);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RendererConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_ladder() {
        let config = RendererConfig {
            screen_scales: vec![],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(VolumaError::EmptyScaleLadder)
        ));
    }

    #[test]
    fn test_rejects_non_descending_ladder() {
        let config = RendererConfig {
            screen_scales: vec![0.5, 0.5],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(VolumaError::InvalidScaleLadder(_))
        ));
    }

    #[test]
    fn test_rejects_scale_above_one() {
        let config = RendererConfig {
            screen_scales: vec![2.0, 1.0],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

//! Error Types
//!
//! This module defines the error types used throughout the rendering core.
//!
//! # Overview
//!
//! The main error type [`VolumaError`] covers the failure modes of the core:
//! - Configuration errors (fatal, surfaced at construction)
//! - Block loader failures
//! - Worker interruption
//!
//! # Propagation policy
//!
//! Only configuration errors cross the public boundary. Loader failures and
//! interruption are recoverable by design: the cache logs them, keeps the
//! placeholder block, and the affected pixel is retried on a later frame.
//!
//! All fallible public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, VolumaError>`.

use thiserror::Error;

/// The main error type for the voluma rendering core.
#[derive(Error, Debug)]
pub enum VolumaError {
    // ========================================================================
    // Configuration Errors (fatal at construction)
    // ========================================================================
    /// The screen-scale ladder is empty.
    #[error("screen-scale ladder is empty")]
    EmptyScaleLadder,

    /// The screen-scale ladder is not strictly descending or starts above 1.0.
    #[error("screen scales must be strictly descending and start at or below 1.0: {0:?}")]
    InvalidScaleLadder(Vec<f64>),

    /// The per-frame I/O budget has no priority levels.
    #[error("I/O budget must contain at least one priority level")]
    EmptyIoBudget,

    /// A block grid was configured with a degenerate block size.
    #[error("block size must be non-zero in every dimension: {0:?}")]
    InvalidBlockSize([u32; 3]),

    /// A priority queue was configured with zero priority lanes.
    #[error("priority queue needs at least one priority lane")]
    NoPriorityLanes,

    // ========================================================================
    // Recoverable Errors (internal, logged and retried)
    // ========================================================================
    /// The block loader failed; the block stays a placeholder and is retried
    /// the next time the cache sees it.
    #[error("block loader failed: {0}")]
    Loader(String),

    /// A worker was asked to stop while blocked in a load.
    #[error("worker interrupted")]
    Interrupted,
}

/// Alias for `Result<T, VolumaError>`.
pub type Result<T> = std::result::Result<T, VolumaError>;

//! Volume Access Layer
//!
//! Bridges the block cache and the projectors:
//!
//! - [`BlockLoader`]: narrow seam to bulk block I/O
//! - [`Payload`] / [`Block`]: volatile sample containers
//! - [`VolatileBlockGrid`]: block-addressed view of one mipmap level
//! - [`GridSampler`]: nearest-neighbor volatile sampler over a grid

pub mod grid;
pub mod loader;
pub mod sampler;

pub use grid::VolatileBlockGrid;
pub use loader::{Block, BlockLoader, Payload};
pub use sampler::{GridSampler, VolatileSample, VolatileSampler};

pub use crate::cache::BlockKey;

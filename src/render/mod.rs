//! Rendering System
//!
//! CPU-side, latency-bounded rendering of multi-resolution volumes:
//!
//! - **[`renderer`]**: coarse-to-fine screen-scale ladder, buffer
//!   rotation, cancellation, adaptive starting scale
//! - **[`hierarchical`]** / **[`accumulate`]** / **[`projector`]**:
//!   projector variants composing whatever blocks are resident into a
//!   best-effort image
//! - **[`painter`]**: the single thread on which `paint` runs
//! - **[`image`]**: ARGB render images and the canvas seam
//!
//! # Control flow
//!
//! A repaint request wakes the painter, which calls
//! [`MultiResolutionRenderer::paint`]. The renderer picks a screen scale,
//! asks the current projector to map, publishes on success, and requests
//! the next finer scale until it reaches full resolution with fully valid
//! data. Missing blocks never stall a frame: they render from coarser
//! mipmap levels and refine on later frames.

pub mod accumulate;
pub mod hierarchical;
pub mod image;
pub mod painter;
pub mod projector;
pub mod renderer;
pub mod settings;

pub use accumulate::AccumulateProjector;
pub use hierarchical::{LevelSource, VolatileHierarchicalProjector};
pub use image::{
    ArgbConverter, ArgbImage, RenderTarget, SharedImage, grayscale_converter, shared_image,
};
pub use painter::{PainterThread, RepaintSignal};
pub use projector::{EmptyProjector, Projector, SingleProjector};
pub use renderer::MultiResolutionRenderer;
pub use settings::RendererConfig;

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod cache;
pub mod errors;
pub mod render;
pub mod utils;
pub mod viewer;
pub mod volume;

pub use cache::{
    BlockCache, BlockKey, CacheConfig, CacheHints, CachedBlock, IoStatistics, IoTimeBudget,
    KeySpace, LoadingStrategy, RenderContext,
};
pub use errors::VolumaError;
pub use render::{
    ArgbImage, MultiResolutionRenderer, PainterThread, Projector, RenderTarget, RendererConfig,
    RepaintSignal, grayscale_converter, shared_image,
};
pub use viewer::{Interpolation, RenderSource, ViewerState};
pub use volume::{Block, BlockLoader, GridSampler, Payload, VolatileBlockGrid, VolatileSampler};

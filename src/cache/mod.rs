//! Block Cache Subsystem
//!
//! Shared residency table for mipmap-organized volume blocks, populated
//! asynchronously under a per-frame I/O regime:
//!
//! - [`BlockCache`]: keyed residency, loading strategies, generations
//! - [`BlockingPriorityQueue`]: priority lanes + prefetch shadow feeding
//!   the fetcher pool
//! - [`IoTimeBudget`]: per-render-job time allowance for blocking loads
//! - [`IoStatistics`] / [`RenderContext`]: per-job I/O accounting and the
//!   job handle threaded through worker dispatch
//!
//! The fetcher pool is an implementation detail of [`BlockCache`]; it is
//! controlled through `pause_fetchers_until` / `wake_fetchers`.

pub mod block_cache;
pub mod budget;
mod fetcher;
pub mod key;
pub mod queue;
pub mod stats;

pub use block_cache::{BlockCache, CacheConfig, CacheHints, CachedBlock, LoadingStrategy};
pub use budget::IoTimeBudget;
pub use key::{BlockKey, KeySpace};
pub use queue::BlockingPriorityQueue;
pub use stats::{ContextGuard, IoStatistics, RenderContext};

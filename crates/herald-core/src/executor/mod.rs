//! Bounded worker pool that keeps blocking and CPU-heavy work off the bot's
//! async runtime.
//!
//! There is one pool per process. It is owned by a [`PoolRegistry`] that the
//! application creates once and shares; the registry builds the pool lazily on
//! first use and tears it down exactly once on shutdown.

mod pool;
mod sizer;

pub use pool::{PoolError, PoolRegistry, TaskHandle, WorkerPool};
pub use sizer::{compute_worker_count, PoolSettings, HARD_CAP};

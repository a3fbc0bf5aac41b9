//! Batch scheduling
//!
//! A [`WorkBatch`] is migrated by a [`MigrationPool`] under a fixed
//! concurrency bound. The caller gets a [`BatchHandle`] back immediately and
//! waits on it for the final [`BatchSummary`].

pub mod batch;
pub mod pool;

pub use batch::{BatchProgress, BatchSummary, BatchTracker, WorkBatch};
pub use pool::{BatchHandle, ImageState, MigrationPool, PoolSettings};

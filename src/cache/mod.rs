//! Partitioned response cache with offline support.
//!
//! This module provides the storage side of the worker:
//! - Named, versioned partitions holding request → response snapshots
//! - Canonical request keys (method + URL, hashed)
//! - Overwrite-by-key writes, never in-place mutation
//! - LRU eviction for capped partitions

mod key;
mod layer;
mod storage;
mod traits;

pub use key::CacheKey;
pub use layer::CacheLayer;
pub use storage::{MemoryStore, SqliteStore};
pub use traits::{CacheStore, CachedResponse, Purpose, ResponseSource, Served};

//! Cache Module
//!
//! Sharded in-memory caching with TTL expiry and LRU/LFU eviction.

use std::fmt::Debug;
use std::hash::Hash;

mod engine;
mod entry;
mod eviction;
mod expiry;
mod stats;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use engine::CacheEngine;
pub use entry::{AccessMetadata, CacheEntry};
pub use eviction::EvictionIndex;
pub use expiry::ExpiryIndex;
pub use stats::{CacheStats, StatsSnapshot};

// == Key and Value Bounds ==
/// Everything the engine needs from a key: hashing for shard routing and
/// the primary map, ordering for the index structures, and the usual
/// send/clone plumbing for crossing worker tasks.
pub trait CacheKey: Clone + Eq + Ord + Hash + Debug + Send + Sync + 'static {}
impl<T> CacheKey for T where T: Clone + Eq + Ord + Hash + Debug + Send + Sync + 'static {}

/// Values are cloned out to callers and into the data source.
pub trait CacheValue: Clone + Send + Sync + 'static {}
impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}

//! Shardcache - a sharded read-through/write-through in-memory cache
//!
//! Fronts a slower [`source::DataSource`] with an in-memory working set:
//! lookups are served from memory when possible, fetched and populated on
//! miss, bounded by an LRU/LFU eviction policy, and expired after a fixed
//! time-to-live. Writes go through or behind the source depending on the
//! configured persistence mode.

pub mod cache;
pub mod config;
pub mod error;
pub mod source;

pub use cache::{CacheEngine, CacheKey, CacheValue, StatsSnapshot};
pub use config::{CacheConfig, EvictionPolicy, PersistenceMode};
pub use error::{CacheError, Result};
pub use source::{DataSource, MemorySource};

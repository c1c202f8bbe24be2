//! Cache Statistics Module
//!
//! Tracks engine performance metrics. Counters are atomic because the
//! engine is shared across shard workers; relaxed ordering is fine for
//! metrics that carry no happens-before obligations.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Shared atomic counters updated by the shard workers.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    persist_failures: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Served from memory.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Value was not in memory (miss-fill, expired, or joined an in-flight load).
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Successful load from the data source.
    pub fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    /// Entry removed under capacity pressure.
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Entry removed by the TTL sweep.
    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// Data source rejected a persist.
    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self, total_entries: usize) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            total_entries,
        }
    }
}

// == Stats Snapshot ==
/// Serializable view of the counters at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Number of gets served from memory
    pub hits: u64,
    /// Number of gets that went to the data source or joined a load
    pub misses: u64,
    /// Number of successful data source loads
    pub loads: u64,
    /// Number of entries evicted under capacity pressure
    pub evictions: u64,
    /// Number of entries removed by the TTL sweep
    pub expirations: u64,
    /// Number of failed persists
    pub persist_failures: u64,
    /// Current number of slots in the primary map
    pub total_entries: usize,
}

impl StatsSnapshot {
    /// Returns hits / (hits + misses), or 0.0 if no gets have been served.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

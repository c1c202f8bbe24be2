//! Configuration Module
//!
//! Handles loading and validating engine configuration from environment variables.

use std::env;
use std::time::Duration;

use serde::Serialize;

use crate::error::{CacheError, Result};

// == Eviction Policy ==
/// Rule selecting which entry to remove under capacity pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvictionPolicy {
    /// Evict the least recently accessed entry
    Lru,
    /// Evict the least frequently accessed entry, ties broken by access time
    Lfu,
}

// == Persistence Mode ==
/// Discipline for propagating writes to the backing data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PersistenceMode {
    /// Persist first; install in memory only on success
    WriteThrough,
    /// Install in memory immediately; persist asynchronously
    WriteBack,
}

/// Engine configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, Serialize)]
pub struct CacheConfig {
    /// Eviction policy applied under capacity pressure
    pub eviction_policy: EvictionPolicy,
    /// Write-through or write-back persistence
    pub persistence_mode: PersistenceMode,
    /// Maximum number of entries the primary map may hold
    pub capacity_threshold: usize,
    /// Time-to-live measured from an entry's load time
    pub ttl: Duration,
    /// Number of shard workers; keys are routed by hash modulo this count
    pub shard_count: usize,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `EVICTION_POLICY` - "lru" or "lfu" (default: lru)
    /// - `PERSISTENCE_MODE` - "write_through" or "write_back" (default: write_through)
    /// - `CAPACITY_THRESHOLD` - Maximum entries (default: 500)
    /// - `TTL_MS` - Entry time-to-live in milliseconds (default: 300000)
    /// - `SHARD_COUNT` - Number of shard workers (default: 8)
    pub fn from_env() -> Self {
        Self {
            eviction_policy: env::var("EVICTION_POLICY")
                .ok()
                .and_then(|v| parse_policy(&v))
                .unwrap_or(EvictionPolicy::Lru),
            persistence_mode: env::var("PERSISTENCE_MODE")
                .ok()
                .and_then(|v| parse_mode(&v))
                .unwrap_or(PersistenceMode::WriteThrough),
            capacity_threshold: env::var("CAPACITY_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            ttl: env::var("TTL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_millis(300_000)),
            shard_count: env::var("SHARD_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
        }
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity_threshold == 0 {
            return Err(CacheError::InvalidConfig(
                "capacity_threshold must be positive".to_string(),
            ));
        }
        if self.ttl.is_zero() {
            return Err(CacheError::InvalidConfig(
                "ttl must be positive".to_string(),
            ));
        }
        if self.shard_count == 0 {
            return Err(CacheError::InvalidConfig(
                "shard_count must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            eviction_policy: EvictionPolicy::Lru,
            persistence_mode: PersistenceMode::WriteThrough,
            capacity_threshold: 500,
            ttl: Duration::from_millis(300_000),
            shard_count: 8,
        }
    }
}

fn parse_policy(value: &str) -> Option<EvictionPolicy> {
    match value.to_ascii_lowercase().as_str() {
        "lru" => Some(EvictionPolicy::Lru),
        "lfu" => Some(EvictionPolicy::Lfu),
        _ => None,
    }
}

fn parse_mode(value: &str) -> Option<PersistenceMode> {
    match value.to_ascii_lowercase().as_str() {
        "write_through" => Some(PersistenceMode::WriteThrough),
        "write_back" => Some(PersistenceMode::WriteBack),
        _ => None,
    }
}

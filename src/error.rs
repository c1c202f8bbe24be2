//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
///
/// Every asynchronous operation reports failure through the future it
/// returns; the engine never panics on a caller-facing path.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The backing data source failed to load a key; no entry was installed
    /// and a later get will retry the load.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The backing data source failed to persist a key/value pair. Under
    /// write-through the set fails and nothing is installed; under
    /// write-back the in-memory install has already happened and the
    /// failure is reported out-of-band.
    #[error("persist failed: {0}")]
    PersistFailed(String),

    /// The eviction index and the primary map disagree on membership.
    /// Indicates an internal defect; not recoverable.
    #[error("capacity invariant violation: {0}")]
    CapacityInvariantViolation(String),

    /// Configuration rejected at engine construction
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The engine's shard workers are gone (engine dropped or shutting down)
    #[error("cache engine is shut down")]
    Shutdown,
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

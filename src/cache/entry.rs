//! Cache Entry Module
//!
//! Defines the per-entry data model: an immutable value and load time plus
//! the mutable access metadata the eviction index orders by.

use std::time::{SystemTime, UNIX_EPOCH};

// == Access Metadata ==
/// Per-entry counters used only for eviction ordering.
///
/// Mutated on every read. Never update this while the entry is still
/// indexed: the eviction index entry for the old snapshot must be removed
/// first and a new one inserted after (see `EvictionIndex`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessMetadata {
    /// Timestamp of the most recent access (Unix milliseconds)
    pub last_access_ms: u64,
    /// Number of accesses since the entry was loaded
    pub access_count: u64,
}

impl AccessMetadata {
    /// Fresh metadata for a newly loaded entry.
    pub fn new(now_ms: u64) -> Self {
        Self {
            last_access_ms: now_ms,
            access_count: 0,
        }
    }

    /// Records one access: bumps the count and refreshes the timestamp.
    pub fn touch(&mut self, now_ms: u64) {
        self.access_count += 1;
        self.last_access_ms = now_ms;
    }
}

// == Cache Entry ==
/// A live cached value with its load time and access metadata.
///
/// Owned exclusively by the engine's primary map; callers only ever see the
/// value. Created on miss-fill or set, destroyed on eviction, expiry, or
/// overwrite.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Load timestamp (Unix milliseconds), fixed at creation
    pub load_time_ms: u64,
    /// Mutable access bookkeeping for eviction ordering
    pub access: AccessMetadata,
}

impl<V> CacheEntry<V> {
    /// Creates an entry loaded now, with zeroed access metadata.
    pub fn new(value: V) -> Self {
        let now = current_timestamp_ms();
        Self {
            value,
            load_time_ms: now,
            access: AccessMetadata::new(now),
        }
    }

    /// Whether the entry's TTL window has elapsed.
    ///
    /// Expiry is anchored to load time: accesses refresh the access
    /// metadata but never the load time. Boundary: an entry loaded at T is
    /// expired once `T <= now - ttl`.
    pub fn is_expired(&self, ttl_ms: u64) -> bool {
        self.load_time_ms <= current_timestamp_ms().saturating_sub(ttl_ms)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_new_entry_has_zero_access_count() {
        let entry = CacheEntry::new("value".to_string());
        assert_eq!(entry.access.access_count, 0);
        assert_eq!(entry.access.last_access_ms, entry.load_time_ms);
    }

    #[test]
    fn test_touch_bumps_count_and_time() {
        let mut access = AccessMetadata::new(100);
        access.touch(250);
        access.touch(300);

        assert_eq!(access.access_count, 2);
        assert_eq!(access.last_access_ms, 300);
    }

    #[test]
    fn test_entry_not_expired_within_ttl() {
        let entry = CacheEntry::new(42u32);
        assert!(!entry.is_expired(60_000));
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let entry = CacheEntry::new(42u32);
        sleep(Duration::from_millis(30));
        assert!(entry.is_expired(10));
    }

    #[test]
    fn test_access_does_not_move_load_time() {
        let mut entry = CacheEntry::new(42u32);
        let load_time = entry.load_time_ms;
        entry.access.touch(current_timestamp_ms() + 1_000);
        assert_eq!(entry.load_time_ms, load_time);
    }

    #[test]
    fn test_expiry_boundary_condition() {
        let now = current_timestamp_ms();
        let entry = CacheEntry {
            value: "test".to_string(),
            load_time_ms: now.saturating_sub(100),
            access: AccessMetadata::new(now),
        };

        // Loaded exactly ttl ago: already expired
        assert!(entry.is_expired(100), "Entry should be expired at boundary");
    }
}

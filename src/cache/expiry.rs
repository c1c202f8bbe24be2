//! Expiry Index Module
//!
//! Ordered index from load time to keys, used by the TTL sweep to find
//! entries older than the configured time-to-live.

use crossbeam_skiplist::SkipMap;

use crate::cache::CacheKey;

// == Expiry Index ==
/// Concurrent ordered index over `(load_time_ms, key)` pairs.
///
/// Keys loaded in the same millisecond form a contiguous run; the front of
/// the map is the oldest load. Invariant: a key appears under time T iff
/// its live entry has `load_time_ms == T` — entries are removed whenever
/// the owning cache entry is removed, for any reason.
pub struct ExpiryIndex<K> {
    entries: SkipMap<(u64, K), ()>,
}

impl<K: CacheKey> ExpiryIndex<K> {
    pub fn new() -> Self {
        Self {
            entries: SkipMap::new(),
        }
    }

    /// Indexes `key` under its load time.
    pub fn insert(&self, load_time_ms: u64, key: K) {
        self.entries.insert((load_time_ms, key), ());
    }

    /// Drops the entry for `key` under the given load time.
    ///
    /// Returns whether an entry was actually removed.
    pub fn remove(&self, load_time_ms: u64, key: &K) -> bool {
        self.entries.remove(&(load_time_ms, key.clone())).is_some()
    }

    /// Pops the oldest entry if it was loaded at or before `cutoff_ms`.
    ///
    /// Returns `None` once the oldest remaining load is within the TTL
    /// window, or the index is empty.
    pub fn pop_expired(&self, cutoff_ms: u64) -> Option<(u64, K)> {
        let front = self.entries.front()?;
        let (load_time_ms, key) = front.key().clone();
        if load_time_ms > cutoff_ms {
            return None;
        }
        // A concurrent sweep may have taken this entry already; the caller
        // treats an empty result as end-of-sweep either way.
        if front.remove() {
            Some((load_time_ms, key))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: CacheKey> Default for ExpiryIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_expired_respects_cutoff() {
        let index = ExpiryIndex::new();

        index.insert(100, "old".to_string());
        index.insert(500, "fresh".to_string());

        assert_eq!(index.pop_expired(200), Some((100, "old".to_string())));
        assert_eq!(index.pop_expired(200), None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_pop_expired_boundary_is_inclusive() {
        let index = ExpiryIndex::new();
        index.insert(100, "k".to_string());

        assert_eq!(index.pop_expired(100), Some((100, "k".to_string())));
    }

    #[test]
    fn test_pop_expired_drains_in_load_order() {
        let index = ExpiryIndex::new();

        index.insert(300, "c".to_string());
        index.insert(100, "a".to_string());
        index.insert(200, "b".to_string());

        assert_eq!(index.pop_expired(u64::MAX), Some((100, "a".to_string())));
        assert_eq!(index.pop_expired(u64::MAX), Some((200, "b".to_string())));
        assert_eq!(index.pop_expired(u64::MAX), Some((300, "c".to_string())));
        assert_eq!(index.pop_expired(u64::MAX), None);
    }

    #[test]
    fn test_same_load_time_holds_multiple_keys() {
        let index = ExpiryIndex::new();

        index.insert(100, "b".to_string());
        index.insert(100, "a".to_string());

        assert_eq!(index.pop_expired(100), Some((100, "a".to_string())));
        assert_eq!(index.pop_expired(100), Some((100, "b".to_string())));
    }

    #[test]
    fn test_remove_reports_membership() {
        let index = ExpiryIndex::new();
        index.insert(100, "k".to_string());

        assert!(index.remove(100, &"k".to_string()));
        assert!(!index.remove(100, &"k".to_string()));
        assert!(index.is_empty());
    }
}

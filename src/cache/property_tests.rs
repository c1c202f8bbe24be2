//! Property-Based Tests for the Cache Engine
//!
//! Uses proptest to verify correctness properties over random operation
//! sequences. Each case drives the engine on a current-thread runtime so
//! operations complete deterministically in program order.

use std::collections::HashMap;
use std::time::Duration;

use proptest::prelude::*;
use tokio::runtime::Builder;

use crate::cache::CacheEngine;
use crate::config::{CacheConfig, EvictionPolicy, PersistenceMode};
use crate::error::CacheError;
use crate::source::MemorySource;

// == Test Configuration ==
const TEST_THRESHOLD: usize = 8;

fn test_config(policy: EvictionPolicy, mode: PersistenceMode) -> CacheConfig {
    CacheConfig {
        eviction_policy: policy,
        persistence_mode: mode,
        capacity_threshold: TEST_THRESHOLD,
        // Long enough that nothing expires mid-case
        ttl: Duration::from_secs(3600),
        shard_count: 4,
    }
}

// == Strategies ==
/// A sequence of cache operations over a small key space, wide enough to
/// generate eviction pressure against TEST_THRESHOLD.
#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: u8, value: u32 },
    Get { key: u8 },
    Delete { key: u8 },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (0u8..32, any::<u32>()).prop_map(|(key, value)| CacheOp::Set { key, value }),
        (0u8..32).prop_map(|key| CacheOp::Get { key }),
        (0u8..32).prop_map(|key| CacheOp::Delete { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // For any sequence of operations, the primary map never exceeds the
    // capacity threshold once an operation has completed.
    #[test]
    fn prop_capacity_bound(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async move {
            let engine = CacheEngine::new(
                test_config(EvictionPolicy::Lru, PersistenceMode::WriteThrough),
                MemorySource::new(),
            )
            .unwrap();

            for op in ops {
                match op {
                    CacheOp::Set { key, value } => {
                        engine.set(key, value).await.unwrap();
                    }
                    CacheOp::Get { key } => {
                        let _ = engine.get(key).await;
                    }
                    CacheOp::Delete { key } => {
                        engine.delete(key).await.unwrap();
                    }
                }
                prop_assert!(
                    engine.len() <= TEST_THRESHOLD,
                    "cache grew to {} entries",
                    engine.len()
                );
            }
            Ok(())
        })?;
    }

    // Under write-through, a get always observes the most recently set
    // value for a key: either straight from memory, or reloaded from the
    // source the set persisted to. Keys never set fail with
    // SourceUnavailable.
    #[test]
    fn prop_get_observes_last_set(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async move {
            let engine = CacheEngine::new(
                test_config(EvictionPolicy::Lru, PersistenceMode::WriteThrough),
                MemorySource::new(),
            )
            .unwrap();
            let mut persisted: HashMap<u8, u32> = HashMap::new();

            for op in ops {
                match op {
                    CacheOp::Set { key, value } => {
                        engine.set(key, value).await.unwrap();
                        persisted.insert(key, value);
                    }
                    CacheOp::Get { key } => {
                        let result = engine.get(key).await;
                        match persisted.get(&key) {
                            Some(expected) => prop_assert_eq!(result.unwrap(), *expected),
                            None => prop_assert!(matches!(
                                result,
                                Err(CacheError::SourceUnavailable(_))
                            )),
                        }
                    }
                    CacheOp::Delete { key } => {
                        // Deleting drops the cached copy, not the
                        // persisted record; a later get reloads it.
                        engine.delete(key).await.unwrap();
                    }
                }
            }
            Ok(())
        })?;
    }

    // Write-back makes a set visible to gets immediately. Restricted to a
    // key space below the threshold so eviction cannot race the
    // still-asynchronous persist.
    #[test]
    fn prop_write_back_visibility(
        ops in prop::collection::vec(
            (0u8..4, any::<u32>(), any::<bool>()),
            1..40,
        )
    ) {
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async move {
            let engine = CacheEngine::new(
                test_config(EvictionPolicy::Lru, PersistenceMode::WriteBack),
                MemorySource::new(),
            )
            .unwrap();
            let mut latest: HashMap<u8, u32> = HashMap::new();

            for (key, value, is_set) in ops {
                if is_set {
                    engine.set(key, value).await.unwrap();
                    latest.insert(key, value);
                } else if let Some(expected) = latest.get(&key) {
                    prop_assert_eq!(engine.get(key).await.unwrap(), *expected);
                }
            }
            Ok(())
        })?;
    }

    // Every get is recorded as exactly one hit or one miss.
    #[test]
    fn prop_stats_count_every_get(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async move {
            let engine = CacheEngine::new(
                test_config(EvictionPolicy::Lfu, PersistenceMode::WriteThrough),
                MemorySource::new(),
            )
            .unwrap();
            let mut gets: u64 = 0;

            for op in ops {
                match op {
                    CacheOp::Set { key, value } => {
                        engine.set(key, value).await.unwrap();
                    }
                    CacheOp::Get { key } => {
                        let _ = engine.get(key).await;
                        gets += 1;
                    }
                    CacheOp::Delete { key } => {
                        engine.delete(key).await.unwrap();
                    }
                }
            }

            let stats = engine.stats();
            prop_assert_eq!(stats.hits + stats.misses, gets, "gets mismatch");
            prop_assert!(stats.loads <= stats.misses, "loads exceed misses");
            Ok(())
        })?;
    }
}

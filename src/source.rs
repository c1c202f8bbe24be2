//! Data Source Module
//!
//! The asynchronous collaborator the engine reads through to and writes
//! through to. Persistence encoding is entirely the source's concern; the
//! engine only sees `load` and `persist`.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{CacheError, Result};

// == Data Source Trait ==
/// A slower backing store the cache fronts.
///
/// Both operations are asynchronous and may take non-trivial time; the
/// engine never calls them on a caller's task. A failed `load` maps to
/// [`CacheError::SourceUnavailable`], a failed `persist` to
/// [`CacheError::PersistFailed`].
#[async_trait]
pub trait DataSource<K, V>: Send + Sync {
    /// Loads the value for `key`, or fails with `SourceUnavailable`.
    async fn load(&self, key: &K) -> Result<V>;

    /// Persists `value` under `key`, or fails with `PersistFailed`.
    async fn persist(&self, key: &K, value: &V) -> Result<()>;
}

// Forwarding impl so a source can be shared between the engine and its
// owner (e.g. to inspect persisted records in tests).
#[async_trait]
impl<K, V, T> DataSource<K, V> for std::sync::Arc<T>
where
    T: DataSource<K, V> + ?Sized,
    K: Send + Sync,
    V: Send + Sync,
{
    async fn load(&self, key: &K) -> Result<V> {
        (**self).load(key).await
    }

    async fn persist(&self, key: &K, value: &V) -> Result<()> {
        (**self).persist(key, value).await
    }
}

// == In-Memory Source ==
/// A [`DataSource`] backed by an in-process map.
///
/// Useful for tests and examples; `load` fails with `SourceUnavailable`
/// for keys that were never persisted or seeded.
#[derive(Debug, Default)]
pub struct MemorySource<K, V> {
    records: RwLock<HashMap<K, V>>,
}

impl<K, V> MemorySource<K, V>
where
    K: Hash + Eq,
{
    /// Creates an empty source.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a source pre-seeded with records.
    pub fn with_records(records: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().collect()),
        }
    }

    /// Inserts a record directly, bypassing the cache.
    pub async fn insert(&self, key: K, value: V) {
        self.records.write().await.insert(key, value);
    }

    /// Reads a record directly, bypassing the cache.
    pub async fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.records.read().await.get(key).cloned()
    }
}

#[async_trait]
impl<K, V> DataSource<K, V> for MemorySource<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn load(&self, key: &K) -> Result<V> {
        self.records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::SourceUnavailable(format!("no record for key {key:?}")))
    }

    async fn persist(&self, key: &K, value: &V) -> Result<()> {
        self.records
            .write()
            .await
            .insert(key.clone(), value.clone());
        Ok(())
    }
}

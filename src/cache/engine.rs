//! Cache Engine Module
//!
//! The root of the crate: a read-through/write-through cache sharded over a
//! fixed pool of workers. Every mutating operation for a key is funneled to
//! the worker owning `hash(key) % shard_count`, which serializes per-key
//! work without a global lock; the primary map and both orderings are
//! concurrent containers shared across workers, so sweeps started on one
//! shard may remove entries owned by another.
//!
//! Expiry is amortized into the write and miss paths instead of a
//! background timer: entries may overstay their TTL until the next mutating
//! operation, bounded by that operation's arrival. This trades slightly
//! stale occupancy for not paying a timer and its lock traffic.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::cache::entry::{current_timestamp_ms, AccessMetadata, CacheEntry};
use crate::cache::eviction::EvictionIndex;
use crate::cache::expiry::ExpiryIndex;
use crate::cache::stats::{CacheStats, StatsSnapshot};
use crate::cache::{CacheKey, CacheValue};
use crate::config::{CacheConfig, PersistenceMode};
use crate::error::{CacheError, Result};
use crate::source::DataSource;

type GetReply<V> = oneshot::Sender<Result<V>>;
type SetReply = oneshot::Sender<Result<()>>;
type DeleteReply = oneshot::Sender<Result<bool>>;

// == Primary Map Slot ==
/// A slot in the primary map: a live entry, or a load in flight.
///
/// Pending slots hold the callers waiting on the load so a second get for
/// an absent key joins the in-flight fetch instead of issuing its own.
/// Pending slots are never indexed for eviction or expiry.
enum Slot<V> {
    Ready(CacheEntry<V>),
    Pending(PendingLoad<V>),
}

struct PendingLoad<V> {
    waiters: Vec<GetReply<V>>,
}

// == Shard Commands ==
/// Work routed to a shard worker. `LoadDone`/`PersistDone` are sent by the
/// spawned source calls back to the owning shard, so that all map and index
/// mutation happens on the worker that serializes the key.
enum Command<K, V> {
    Get {
        key: K,
        reply: GetReply<V>,
    },
    Set {
        key: K,
        value: V,
        reply: SetReply,
    },
    Delete {
        key: K,
        reply: DeleteReply,
    },
    Warm {
        key: K,
    },
    LoadDone {
        key: K,
        result: Result<V>,
    },
    PersistDone {
        key: K,
        value: V,
        result: Result<()>,
        reply: Option<SetReply>,
    },
}

// == Shared State ==
/// State shared by the engine handle and every shard worker.
struct Shared<K, V, S> {
    map: DashMap<K, Slot<V>>,
    expiry: ExpiryIndex<K>,
    eviction: EvictionIndex<K>,
    stats: CacheStats,
    config: CacheConfig,
    source: S,
}

// == Cache Engine ==
/// Sharded read-through/write-through cache in front of a [`DataSource`].
///
/// `get` and `set` enqueue work on the key's shard and return immediately
/// with a future; the data source round trip never runs on the caller's
/// task. Construction requires a running tokio runtime (the shard workers
/// are spawned tasks). Dropping every engine handle closes the shard
/// channels; workers finish in-flight source calls and exit.
pub struct CacheEngine<K, V, S> {
    shards: Vec<mpsc::UnboundedSender<Command<K, V>>>,
    shared: Arc<Shared<K, V, S>>,
}

impl<K, V, S> Clone for CacheEngine<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            shards: self.shards.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V, S> CacheEngine<K, V, S>
where
    K: CacheKey,
    V: CacheValue,
    S: DataSource<K, V> + 'static,
{
    // == Constructor ==
    /// Creates an engine with no warm-up set.
    pub fn new(config: CacheConfig, source: S) -> Result<Self> {
        Self::with_hot_keys(config, source, Vec::new())
    }

    /// Creates an engine and pre-fetches `hot_keys` from the source.
    ///
    /// Warm loads go through the regular miss-fill path on each key's
    /// shard and do not block readiness; a warm load races with concurrent
    /// `get`/`set` calls for the same key under the same
    /// last-completed-installation-wins rule as any other load.
    pub fn with_hot_keys(config: CacheConfig, source: S, hot_keys: Vec<K>) -> Result<Self> {
        config.validate()?;
        let shard_count = config.shard_count;
        let shared = Arc::new(Shared {
            map: DashMap::new(),
            expiry: ExpiryIndex::new(),
            eviction: EvictionIndex::new(config.eviction_policy),
            stats: CacheStats::new(),
            config,
            source,
        });

        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_shard(rx, Arc::clone(&shared)));
            shards.push(tx);
        }
        info!(
            shards = shard_count,
            capacity = shared.config.capacity_threshold,
            ttl_ms = shared.config.ttl.as_millis() as u64,
            "cache engine started"
        );

        let engine = Self { shards, shared };
        for key in hot_keys {
            let shard = engine.shard_of(&key);
            let _ = engine.shards[shard].send(Command::Warm { key });
        }
        Ok(engine)
    }

    // == Get ==
    /// Resolves to the current value for `key`, loading it from the data
    /// source on first access.
    ///
    /// Fails with [`CacheError::SourceUnavailable`] if the load fails; no
    /// entry is installed and a later get retries.
    pub async fn get(&self, key: K) -> Result<V> {
        let (tx, rx) = oneshot::channel();
        let shard = self.shard_of(&key);
        self.shards[shard]
            .send(Command::Get { key, reply: tx })
            .map_err(|_| CacheError::Shutdown)?;
        rx.await.map_err(|_| CacheError::Shutdown)?
    }

    // == Set ==
    /// Installs `value` for `key` under the configured persistence mode.
    ///
    /// Write-through completes after the source persisted and the entry is
    /// installed, failing with [`CacheError::PersistFailed`] (and
    /// installing nothing) if the source rejects it. Write-back completes
    /// as soon as the in-memory install happened; a persist failure is
    /// logged and counted but never rolls the cached value back.
    pub async fn set(&self, key: K, value: V) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let shard = self.shard_of(&key);
        self.shards[shard]
            .send(Command::Set {
                key,
                value,
                reply: tx,
            })
            .map_err(|_| CacheError::Shutdown)?;
        rx.await.map_err(|_| CacheError::Shutdown)?
    }

    // == Delete ==
    /// Tears down the live entry for `key`, returning whether one existed.
    ///
    /// An in-flight load for the key is not cancelled and may still
    /// install afterwards.
    pub async fn delete(&self, key: K) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        let shard = self.shard_of(&key);
        self.shards[shard]
            .send(Command::Delete { key, reply: tx })
            .map_err(|_| CacheError::Shutdown)?;
        rx.await.map_err(|_| CacheError::Shutdown)?
    }

    // == Length ==
    /// Current number of primary-map slots, counting in-flight loads.
    pub fn len(&self) -> usize {
        self.shared.map.len()
    }

    /// Returns true if the cache holds no slots.
    pub fn is_empty(&self) -> bool {
        self.shared.map.is_empty()
    }

    // == Stats ==
    /// Returns current engine statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot(self.shared.map.len())
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    fn shard_of(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }
}

// == Shard Worker ==
/// One lane of serialized execution for all keys hashing to it.
struct ShardWorker<K, V, S> {
    shared: Arc<Shared<K, V, S>>,
    done_tx: mpsc::UnboundedSender<Command<K, V>>,
    in_flight: usize,
}

async fn run_shard<K, V, S>(
    mut requests: mpsc::UnboundedReceiver<Command<K, V>>,
    shared: Arc<Shared<K, V, S>>,
) where
    K: CacheKey,
    V: CacheValue,
    S: DataSource<K, V> + 'static,
{
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let mut worker = ShardWorker {
        shared,
        done_tx,
        in_flight: 0,
    };

    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(command) => worker.handle(command),
                None => break,
            },
            Some(completion) = done_rx.recv() => worker.handle(completion),
        }
    }

    // Engine dropped: let in-flight source calls complete before exiting.
    while worker.in_flight > 0 {
        match done_rx.recv().await {
            Some(completion) => worker.handle(completion),
            None => break,
        }
    }
}

impl<K, V, S> ShardWorker<K, V, S>
where
    K: CacheKey,
    V: CacheValue,
    S: DataSource<K, V> + 'static,
{
    fn handle(&mut self, command: Command<K, V>) {
        match command {
            Command::Get { key, reply } => self.handle_get(key, reply),
            Command::Set { key, value, reply } => self.handle_set(key, value, reply),
            Command::Delete { key, reply } => {
                let _ = reply.send(self.teardown_ready(&key));
            }
            Command::Warm { key } => self.handle_warm(key),
            Command::LoadDone { key, result } => self.handle_load_done(key, result),
            Command::PersistDone {
                key,
                value,
                result,
                reply,
            } => self.handle_persist_done(key, value, result, reply),
        }
    }

    // == Get ==
    fn handle_get(&mut self, key: K, reply: GetReply<V>) {
        let ttl_ms = self.shared.config.ttl.as_millis() as u64;
        let mut stale: Option<(u64, AccessMetadata)> = None;

        if let Some(mut slot) = self.shared.map.get_mut(&key) {
            match slot.value_mut() {
                Slot::Ready(entry) if !entry.is_expired(ttl_ms) => {
                    let value = entry.value.clone();
                    self.touch(&key, entry);
                    self.shared.stats.record_hit();
                    let _ = reply.send(Ok(value));
                    return;
                }
                // Overstayed its TTL; tear it down below and reload.
                Slot::Ready(entry) => stale = Some((entry.load_time_ms, entry.access)),
                Slot::Pending(pending) => {
                    pending.waiters.push(reply);
                    self.shared.stats.record_miss();
                    return;
                }
            }
        }

        if let Some((load_time, access)) = stale {
            let removed = self.shared.map.remove_if(&key, |_, slot| {
                matches!(slot, Slot::Ready(entry) if entry.load_time_ms == load_time)
            });
            if removed.is_some() {
                self.shared.expiry.remove(load_time, &key);
                self.shared.eviction.remove(&access, &key);
                self.shared.stats.record_expiration();
            }
        }

        self.shared.stats.record_miss();
        self.make_room();
        self.begin_load(key, vec![reply]);
    }

    // == Set ==
    fn handle_set(&mut self, key: K, value: V, reply: SetReply) {
        // Full teardown of the previous entry; the new one gets a fresh
        // load time and metadata rather than a value-only overwrite.
        if let Err(err) = self.teardown_ready(&key) {
            let _ = reply.send(Err(err));
            return;
        }
        self.make_room();

        match self.shared.config.persistence_mode {
            PersistenceMode::WriteThrough => self.begin_persist(key, value, Some(reply)),
            PersistenceMode::WriteBack => {
                let waiters = self.install_entry(key.clone(), value.clone());
                self.resolve_waiters(&key, &value, waiters);
                let _ = reply.send(Ok(()));
                self.begin_persist(key, value, None);
            }
        }
    }

    // == Warm-up ==
    fn handle_warm(&mut self, key: K) {
        // A live entry or an in-flight load for the key wins over the warm load.
        if self.shared.map.contains_key(&key) {
            return;
        }
        self.make_room();
        self.begin_load(key, Vec::new());
    }

    // == Load Completion ==
    fn handle_load_done(&mut self, key: K, result: Result<V>) {
        self.in_flight -= 1;
        match result {
            Ok(value) => {
                if !self.shared.map.contains_key(&key) {
                    // The slot was deleted while the load was in flight.
                    debug!(key = ?key, "discarding load result for removed key");
                    return;
                }
                self.shared.stats.record_load();
                let waiters = self.install_entry(key.clone(), value.clone());
                self.resolve_waiters(&key, &value, waiters);
            }
            Err(err) => {
                let removed = self
                    .shared
                    .map
                    .remove_if(&key, |_, slot| matches!(slot, Slot::Pending(_)));
                if let Some((_, Slot::Pending(pending))) = removed {
                    for waiter in pending.waiters {
                        let _ = waiter.send(Err(err.clone()));
                    }
                } else {
                    // A set completed while the load was failing; the
                    // installed value stands.
                    warn!(key = ?key, error = %err, "discarding stale load failure");
                }
            }
        }
    }

    // == Persist Completion ==
    fn handle_persist_done(
        &mut self,
        key: K,
        value: V,
        result: Result<()>,
        reply: Option<SetReply>,
    ) {
        self.in_flight -= 1;
        match (result, reply) {
            // Write-through: persisted, install now.
            (Ok(()), Some(reply)) => {
                self.make_room();
                let waiters = self.install_entry(key.clone(), value.clone());
                self.resolve_waiters(&key, &value, waiters);
                let _ = reply.send(Ok(()));
            }
            // Write-back success needs no further work.
            (Ok(()), None) => {}
            (Err(err), Some(reply)) => {
                self.shared.stats.record_persist_failure();
                let _ = reply.send(Err(err));
            }
            (Err(err), None) => {
                self.shared.stats.record_persist_failure();
                warn!(key = ?key, error = %err, "write-back persist failed; cached value kept");
            }
        }
    }

    // == Access Bookkeeping ==
    /// Re-indexes an entry after a read: the eviction entry for the old
    /// metadata snapshot is removed before the metadata mutates, then the
    /// key is reinserted under the fresh snapshot.
    fn touch(&self, key: &K, entry: &mut CacheEntry<V>) {
        self.shared.eviction.remove(&entry.access, key);
        entry.access.touch(current_timestamp_ms());
        self.shared.eviction.insert(&entry.access, key.clone());
    }

    // == Install ==
    /// Puts a fresh entry into the primary map and both indexes, tearing
    /// down whatever occupied the slot. Returns the waiters of a replaced
    /// pending load; the caller resolves them with the installed value
    /// (last completed installation wins).
    fn install_entry(&self, key: K, value: V) -> Vec<GetReply<V>> {
        let entry = CacheEntry::new(value);
        let load_time = entry.load_time_ms;
        let access = entry.access;

        let mut waiters = Vec::new();
        match self.shared.map.insert(key.clone(), Slot::Ready(entry)) {
            Some(Slot::Ready(old)) => {
                self.shared.expiry.remove(old.load_time_ms, &key);
                self.shared.eviction.remove(&old.access, &key);
            }
            Some(Slot::Pending(pending)) => waiters = pending.waiters,
            None => {}
        }

        self.shared.expiry.insert(load_time, key.clone());
        self.shared.eviction.insert(&access, key);
        waiters
    }

    /// Serves queued waiters after an install. Each waiter counts as one
    /// access against the freshly installed entry.
    fn resolve_waiters(&self, key: &K, value: &V, waiters: Vec<GetReply<V>>) {
        for waiter in waiters {
            if let Some(mut slot) = self.shared.map.get_mut(key) {
                if let Slot::Ready(entry) = slot.value_mut() {
                    self.touch(key, entry);
                }
            }
            let _ = waiter.send(Ok(value.clone()));
        }
    }

    // == Teardown ==
    /// Removes the live entry for `key` from the primary map and both
    /// indexes. Pending slots are left alone. A missing expiry entry for a
    /// removed live entry means the indexes diverged from the map, which
    /// is an unrecoverable defect; a missing eviction entry is legal (an
    /// eviction sweep on another shard may have popped it already).
    fn teardown_ready(&self, key: &K) -> Result<bool> {
        let removed = self
            .shared
            .map
            .remove_if(key, |_, slot| matches!(slot, Slot::Ready(_)));
        let Some((_, Slot::Ready(entry))) = removed else {
            return Ok(false);
        };

        let in_expiry = self.shared.expiry.remove(entry.load_time_ms, key);
        if !self.shared.eviction.remove(&entry.access, key) {
            debug!(key = ?key, "eviction entry already claimed by a sweep");
        }
        if !in_expiry {
            return Err(CacheError::CapacityInvariantViolation(format!(
                "live entry for {key:?} missing from expiry index"
            )));
        }
        Ok(true)
    }

    // == Capacity Check ==
    /// Runs before every install: evicts while the map is at or above the
    /// capacity threshold so the upcoming install keeps it bounded, then
    /// sweeps expired entries.
    fn make_room(&self) {
        let threshold = self.shared.config.capacity_threshold;
        while self.shared.map.len() >= threshold {
            let Some(victim) = self.shared.eviction.pop_front() else {
                // Nothing evictable: only in-flight loads remain.
                break;
            };
            self.evict(victim);
        }
        self.expire_sweep();
    }

    fn evict(&self, victim: K) {
        // The victim may have been removed by a concurrent sweep between
        // popping it and getting here; that is a no-op.
        let removed = self
            .shared
            .map
            .remove_if(&victim, |_, slot| matches!(slot, Slot::Ready(_)));
        if let Some((_, Slot::Ready(entry))) = removed {
            self.shared.expiry.remove(entry.load_time_ms, &victim);
            // The entry may have been re-indexed under fresher metadata
            // after its old entry was popped.
            self.shared.eviction.remove(&entry.access, &victim);
            self.shared.stats.record_eviction();
            debug!(key = ?victim, "evicted under capacity pressure");
        }
    }

    // == TTL Sweep ==
    /// Pops the oldest loads while they fall outside the TTL window and
    /// tears the owning entries down. Only the generation named by the
    /// expiry entry is removed; a reinstalled key with a fresh load time
    /// is left alone.
    fn expire_sweep(&self) {
        let ttl_ms = self.shared.config.ttl.as_millis() as u64;
        let cutoff = current_timestamp_ms().saturating_sub(ttl_ms);

        while let Some((load_time, key)) = self.shared.expiry.pop_expired(cutoff) {
            let removed = self.shared.map.remove_if(&key, |_, slot| {
                matches!(slot, Slot::Ready(entry) if entry.load_time_ms == load_time)
            });
            if let Some((_, Slot::Ready(entry))) = removed {
                self.shared.eviction.remove(&entry.access, &key);
                self.shared.stats.record_expiration();
                debug!(key = ?key, "expired past ttl");
            }
        }
    }

    // == Source Calls ==
    /// Installs a pending slot and spawns the source load; completion is
    /// routed back to this shard as `LoadDone`.
    fn begin_load(&mut self, key: K, waiters: Vec<GetReply<V>>) {
        self.shared
            .map
            .insert(key.clone(), Slot::Pending(PendingLoad { waiters }));
        self.in_flight += 1;

        let shared = Arc::clone(&self.shared);
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = shared.source.load(&key).await;
            let _ = done.send(Command::LoadDone { key, result });
        });
    }

    /// Spawns the source persist; completion is routed back to this shard
    /// as `PersistDone`. `reply` is present for write-through, where the
    /// install waits on the persist.
    fn begin_persist(&mut self, key: K, value: V, reply: Option<SetReply>) {
        self.in_flight += 1;

        let shared = Arc::clone(&self.shared);
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = shared.source.persist(&key, &value).await;
            let _ = done.send(Command::PersistDone {
                key,
                value,
                result,
                reply,
            });
        });
    }
}

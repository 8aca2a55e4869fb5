//! Tiered cache: bounded in-process tier in front of a durable tier
//!
//! Lookups check the in-process tier first, then the durable tier, and
//! promote durable hits into memory. Writes and removals go to both tiers.
//! Durable failures never reach the caller: they are logged, counted and
//! published on a broadcast channel. After a failure, durable reads are
//! skipped for `durable_backoff` so lookups keep serving from memory.
//!
//! Writes and removals are always attempted. A key whose durable write or
//! removal failed is tracked as unsynced: its durable record is never
//! promoted, and it is rewritten (or deleted) once the backend accepts
//! calls again.

use crate::cache::{
    config::CacheConfig,
    durable::DurableStore,
    entry::CacheEntry,
    invalidation::{InvalidationEvent, InvalidationReason},
    memory::MemoryTier,
    types::{CacheKey, CacheStats, CacheTier, CacheValue},
};
use crate::error::CacheError;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const KEY_LOCK_STRIPES: usize = 64;
const FAILURE_CHANNEL_CAPACITY: usize = 64;
const INVALIDATION_CHANNEL_CAPACITY: usize = 256;

/// Durable tier operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOperation {
    Read,
    Write,
    Remove,
    Decode,
}

impl std::fmt::Display for BackendOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendOperation::Read => write!(f, "read"),
            BackendOperation::Write => write!(f, "write"),
            BackendOperation::Remove => write!(f, "remove"),
            BackendOperation::Decode => write!(f, "decode"),
        }
    }
}

/// A durable tier failure, published on the side channel
#[derive(Debug, Clone)]
pub struct BackendFailure {
    /// Backend name
    pub backend: String,

    /// What was being attempted
    pub operation: BackendOperation,

    /// Key involved
    pub key: CacheKey,

    /// Error text
    pub message: String,

    /// When it happened
    pub at: DateTime<Utc>,
}

/// Tiered response cache
pub struct TieredCache {
    config: CacheConfig,

    /// In-process tier and the counters updated under its lock
    store: RwLock<CacheStore>,

    durable: Option<Arc<dyn DurableStore>>,

    /// Striped per-key locks serializing mutations of the same key
    key_locks: Vec<Mutex<()>>,

    /// Durable reads are skipped until this instant
    bypass_until: parking_lot::Mutex<Option<Instant>>,

    /// Keys whose durable record may disagree with the in-process tier
    unsynced: parking_lot::Mutex<HashSet<CacheKey>>,

    memory_hits: AtomicU64,
    misses: AtomicU64,
    backend_errors: AtomicU64,

    failures: broadcast::Sender<BackendFailure>,
    invalidations: broadcast::Sender<InvalidationEvent>,
}

struct CacheStore {
    tier: MemoryTier,
    stats: CacheStats,
}

impl TieredCache {
    /// Create an in-process-only cache
    pub fn new(config: CacheConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a cache backed by a durable store
    pub fn with_durable(config: CacheConfig, durable: Arc<dyn DurableStore>) -> Self {
        Self::build(config, Some(durable))
    }

    fn build(config: CacheConfig, durable: Option<Arc<dyn DurableStore>>) -> Self {
        info!(
            "Initializing tiered cache (ttl: {:?}, capacity: {}, durable: {})",
            config.ttl,
            config.memory_capacity,
            durable.as_ref().map(|d| d.name()).unwrap_or("none")
        );

        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        let (invalidations, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);

        Self {
            store: RwLock::new(CacheStore {
                tier: MemoryTier::new(config.memory_capacity),
                stats: CacheStats::default(),
            }),
            durable,
            key_locks: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            bypass_until: parking_lot::Mutex::new(None),
            unsynced: parking_lot::Mutex::new(HashSet::new()),
            memory_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            backend_errors: AtomicU64::new(0),
            failures,
            invalidations,
            config,
        }
    }

    /// Cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Receive durable tier failures as they happen
    pub fn subscribe_backend_failures(&self) -> broadcast::Receiver<BackendFailure> {
        self.failures.subscribe()
    }

    /// Receive an event for every in-process invalidation: capacity
    /// evictions, manual removals, expirations and clears
    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.invalidations.subscribe()
    }

    /// Look up a value
    ///
    /// Returns `None` when neither tier holds a live entry. A durable hit is
    /// promoted into the in-process tier with its original storage time.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        self.get_with_tier(key).await.map(|(value, _)| value)
    }

    /// Look up a value and report which tier answered
    pub async fn get_with_tier(&self, key: &CacheKey) -> Option<(CacheValue, CacheTier)> {
        if let Some(value) = self.get_from_memory(key).await {
            return Some((value, CacheTier::Memory));
        }

        if self.durable.is_none() {
            self.record_miss(key);
            return None;
        }

        let _guard = self.lock_key(key).await;

        // a concurrent set or promotion may have filled memory meanwhile
        if let Some(value) = self.get_from_memory(key).await {
            return Some((value, CacheTier::Memory));
        }

        if self.is_unsynced(key) {
            // the durable record predates a write or removal that never landed
            if let Some(durable) = self.active_durable() {
                self.sync_key(durable.as_ref(), key).await;
            }
            self.record_miss(key);
            return None;
        }

        let Some(durable) = self.active_durable() else {
            self.record_miss(key);
            return None;
        };

        let bytes = match durable.read(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.record_miss(key);
                return None;
            }
            Err(e) => {
                self.report_failure(durable.as_ref(), BackendOperation::Read, key, &e);
                self.record_miss(key);
                return None;
            }
        };

        let entry = match CacheEntry::from_bytes(key, &bytes) {
            Ok(entry) => entry,
            Err(e) => {
                self.report_failure(durable.as_ref(), BackendOperation::Decode, key, &e);
                self.remove_durable(durable.as_ref(), key).await;
                self.record_miss(key);
                return None;
            }
        };

        if entry.is_expired(self.config.ttl) {
            debug!("Durable entry expired: {}", key.short());
            self.remove_durable(durable.as_ref(), key).await;
            self.store.write().await.stats.evictions_ttl += 1;
            self.record_miss(key);
            return None;
        }

        let value = entry.value.clone();
        let evicted = {
            let mut store = self.store.write().await;
            let evicted = store.tier.insert(entry);
            if evicted.is_some() {
                store.stats.evictions_capacity += 1;
            }
            store.stats.durable_hits += 1;
            evicted
        };

        if let Some(evicted) = evicted {
            debug!("Evicted {} to promote {}", evicted.short(), key.short());
            self.publish(InvalidationEvent::new(InvalidationReason::Capacity, vec![evicted]));
        }

        debug!("Durable hit, promoted: {}", key.short());
        Some((value, CacheTier::Durable))
    }

    /// Store a value in both tiers
    ///
    /// Overwriting a key replaces its value and resets its age.
    pub async fn set(&self, key: &CacheKey, value: CacheValue) {
        let entry = CacheEntry::new(*key, value);
        let _guard = self.lock_key(key).await;

        let record = self.durable.as_ref().map(|_| entry.to_bytes());

        let evicted = {
            let mut store = self.store.write().await;
            let evicted = store.tier.insert(entry);
            if evicted.is_some() {
                store.stats.evictions_capacity += 1;
            }
            store.stats.writes += 1;
            evicted
        };

        if let Some(evicted) = evicted {
            debug!("Evicting oldest entry {} (capacity)", evicted.short());
            self.publish(InvalidationEvent::new(InvalidationReason::Capacity, vec![evicted]));
        }

        // writes are attempted even while durable reads are bypassed
        if let (Some(durable), Some(record)) = (self.durable.as_ref(), record) {
            let result = match record {
                Ok(bytes) => durable.write(key, bytes).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => self.mark_synced(key),
                Err(e) => {
                    self.report_failure(durable.as_ref(), BackendOperation::Write, key, &e);
                    self.mark_unsynced(key);
                }
            }
        }

        debug!("Stored cache entry: {}", key.short());
    }

    /// Remove a key from both tiers, returning the in-process value
    pub async fn remove(&self, key: &CacheKey) -> Option<CacheValue> {
        let _guard = self.lock_key(key).await;

        let removed = {
            let mut store = self.store.write().await;
            let removed = store.tier.remove(key);
            if removed.is_some() {
                store.stats.invalidations += 1;
            }
            removed
        };

        if removed.is_some() {
            self.publish(InvalidationEvent::new(InvalidationReason::Manual, vec![*key]));
        }

        if let Some(durable) = self.durable.as_ref() {
            match durable.remove(key).await {
                Ok(()) => self.mark_synced(key),
                Err(e) => {
                    self.report_failure(durable.as_ref(), BackendOperation::Remove, key, &e);
                    self.mark_unsynced(key);
                }
            }
        }

        debug!("Removed cache entry: {}", key.short());
        removed.map(|entry| entry.value)
    }

    /// Check if a key is held by the in-process tier
    pub async fn contains_key(&self, key: &CacheKey) -> bool {
        self.store.read().await.tier.contains_key(key)
    }

    /// Drop every in-process entry; the durable tier is left untouched
    pub async fn clear(&self) -> InvalidationEvent {
        let keys = {
            let mut store = self.store.write().await;
            let keys = store.tier.clear();
            store.stats.invalidations += keys.len() as u64;
            keys
        };

        info!("Cleared {} entries from the in-process tier", keys.len());
        let event = InvalidationEvent::new(InvalidationReason::Cleared, keys);
        self.publish(event.clone());
        event
    }

    /// Remove expired in-process entries
    pub async fn cleanup_expired(&self) -> Option<InvalidationEvent> {
        let expired = {
            let mut store = self.store.write().await;
            let expired = store.tier.expired_keys(self.config.ttl);
            for key in &expired {
                store.tier.remove(key);
            }
            store.stats.evictions_ttl += expired.len() as u64;
            expired
        };

        if expired.is_empty() {
            return None;
        }

        debug!("Cleaned up {} expired entries", expired.len());
        let context = format!("Cleaned up {} expired entries", expired.len());
        let event = InvalidationEvent::new(InvalidationReason::Expired, expired).with_context(context);
        self.publish(event.clone());
        Some(event)
    }

    /// Bring unsynced durable records back in line with the in-process tier
    ///
    /// Each unsynced key is rewritten from memory, or deleted from the
    /// durable tier when memory no longer holds it. Stops at the first
    /// failure. Returns how many keys were brought back in sync.
    pub async fn sync_durable(&self) -> usize {
        let Some(durable) = self.active_durable() else {
            return 0;
        };

        let pending: Vec<CacheKey> = self.unsynced.lock().iter().copied().collect();
        let mut synced = 0;

        for key in pending {
            let _guard = self.lock_key(&key).await;
            if !self.is_unsynced(&key) {
                continue;
            }
            if !self.sync_key(durable.as_ref(), &key).await {
                break;
            }
            synced += 1;
        }

        if synced > 0 {
            info!("Synced {} durable records with the in-process tier", synced);
        }
        synced
    }

    /// Number of keys whose durable record may be stale
    pub fn unsynced_len(&self) -> usize {
        self.unsynced.lock().len()
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let store = self.store.read().await;
        let mut stats = store.stats.clone();
        stats.entries = store.tier.len();
        stats.size_bytes = store.tier.size_bytes();
        stats.memory_hits = self.memory_hits.load(Ordering::Relaxed);
        stats.misses = self.misses.load(Ordering::Relaxed);
        stats.backend_errors = self.backend_errors.load(Ordering::Relaxed);
        stats
    }

    /// Number of entries in the in-process tier
    pub async fn len(&self) -> usize {
        self.store.read().await.tier.len()
    }

    /// Check if the in-process tier is empty
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.tier.is_empty()
    }

    /// Start the periodic sweep if it is enabled in the configuration
    pub fn spawn_auto_cleanup(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.enable_auto_cleanup {
            return None;
        }
        Some(tokio::spawn(start_auto_cleanup(Arc::downgrade(self))))
    }

    async fn get_from_memory(&self, key: &CacheKey) -> Option<CacheValue> {
        {
            let store = self.store.read().await;
            let entry = store.tier.get(key)?;
            if !entry.is_expired(self.config.ttl) {
                self.memory_hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit: {}", key.short());
                return Some(entry.value.clone());
            }
        }

        let mut store = self.store.write().await;

        // recheck: a set may have replaced the entry between the two locks
        let live = match store.tier.get(key) {
            Some(entry) if !entry.is_expired(self.config.ttl) => Some(entry.value.clone()),
            Some(_) => None,
            None => return None,
        };
        if live.is_some() {
            self.memory_hits.fetch_add(1, Ordering::Relaxed);
            return live;
        }

        debug!("Cache entry expired: {}", key.short());
        store.tier.remove(key);
        store.stats.evictions_ttl += 1;
        drop(store);

        self.publish(InvalidationEvent::new(InvalidationReason::Expired, vec![*key]));
        None
    }

    fn record_miss(&self, key: &CacheKey) {
        debug!("Cache miss: {}", key.short());
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn publish(&self, event: InvalidationEvent) {
        let _ = self.invalidations.send(event);
    }

    async fn lock_key(&self, key: &CacheKey) -> MutexGuard<'_, ()> {
        let bytes = key.as_bytes();
        let stripe = u16::from_le_bytes([bytes[0], bytes[1]]) as usize % self.key_locks.len();
        self.key_locks[stripe].lock().await
    }

    /// The durable tier, unless reads are currently bypassed
    fn active_durable(&self) -> Option<Arc<dyn DurableStore>> {
        let durable = self.durable.as_ref()?;

        let mut bypass = self.bypass_until.lock();
        if let Some(until) = *bypass {
            if Instant::now() < until {
                return None;
            }
            info!("Re-enabling durable reads from '{}'", durable.name());
            *bypass = None;
        }

        Some(durable.clone())
    }

    fn is_unsynced(&self, key: &CacheKey) -> bool {
        self.unsynced.lock().contains(key)
    }

    fn mark_unsynced(&self, key: &CacheKey) {
        self.unsynced.lock().insert(*key);
    }

    fn mark_synced(&self, key: &CacheKey) {
        self.unsynced.lock().remove(key);
    }

    /// Rewrite or delete one unsynced durable record; the caller holds the key lock
    async fn sync_key(&self, durable: &dyn DurableStore, key: &CacheKey) -> bool {
        let current = self.store.read().await.tier.get(key).cloned();

        let (operation, result) = match current {
            Some(entry) => {
                let result = match entry.to_bytes() {
                    Ok(bytes) => durable.write(key, bytes).await,
                    Err(e) => Err(e),
                };
                (BackendOperation::Write, result)
            }
            None => (BackendOperation::Remove, durable.remove(key).await),
        };

        match result {
            Ok(()) => {
                debug!("Synced durable record ({}): {}", operation, key.short());
                self.mark_synced(key);
                true
            }
            Err(e) => {
                self.report_failure(durable, operation, key, &e);
                false
            }
        }
    }

    async fn remove_durable(&self, durable: &dyn DurableStore, key: &CacheKey) {
        if let Err(e) = durable.remove(key).await {
            self.report_failure(durable, BackendOperation::Remove, key, &e);
        }
    }

    fn report_failure(
        &self,
        durable: &dyn DurableStore,
        operation: BackendOperation,
        key: &CacheKey,
        error: &CacheError,
    ) {
        warn!(
            "Durable tier '{}' {} failed for {}: {}",
            durable.name(),
            operation,
            key.short(),
            error
        );

        self.backend_errors.fetch_add(1, Ordering::Relaxed);

        // malformed data for one key says nothing about backend health
        if operation != BackendOperation::Decode && !self.config.durable_backoff.is_zero() {
            *self.bypass_until.lock() = Some(Instant::now() + self.config.durable_backoff);
            warn!(
                "Bypassing durable reads from '{}' for {:?}",
                durable.name(),
                self.config.durable_backoff
            );
        }

        let _ = self.failures.send(BackendFailure {
            backend: durable.name().to_string(),
            operation,
            key: *key,
            message: error.to_string(),
            at: Utc::now(),
        });
    }
}

/// Background task for automatic cache cleanup
///
/// Sweeps expired entries and resyncs durable records on every tick. Runs
/// until the cache is dropped.
pub async fn start_auto_cleanup(cache: Weak<TieredCache>) {
    let interval = match cache.upgrade() {
        Some(cache) => cache.config.cleanup_interval,
        None => return,
    };

    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        let Some(cache) = cache.upgrade() else {
            debug!("Cache dropped, stopping cleanup task");
            return;
        };

        if let Some(event) = cache.cleanup_expired().await {
            debug!("Auto cleanup removed {} entries", event.len());
        }
        cache.sync_durable().await;
    }
}

//! Integration tests for the tiered cache
//!
//! These tests exercise the public cache API end to end:
//! - Capacity eviction and TTL expiry
//! - Promotion from the durable tier
//! - Degraded operation while the durable tier is failing
//! - Persistence through the file-backed store

use aicache_core::cache::{
    BackendOperation, CacheConfig, CacheEntry, CacheKey, CacheTier, DurableStore, FileStore,
    InvalidationReason, MemoryStore, TieredCache,
};
use aicache_core::{CacheError, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn key(prompt: &str) -> CacheKey {
    CacheKey::derive("gpt-4o", prompt, &serde_json::json!({"temperature": 0.0})).unwrap()
}

/// In-memory store that can be switched into failing mode
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl FlakyStore {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self, operation: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::backend(operation, "service unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        self.check("read")?;
        self.inner.read(key).await
    }

    async fn write(&self, key: &CacheKey, bytes: Vec<u8>) -> Result<()> {
        self.check("write")?;
        self.inner.write(key, bytes).await
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        self.check("remove")?;
        self.inner.remove(key).await
    }
}

#[tokio::test]
async fn test_capacity_scenario_in_process_only() {
    let config = CacheConfig::builder()
        .ttl(Duration::from_millis(1000))
        .memory_capacity(2)
        .build();
    let cache = TieredCache::new(config);

    cache.set(&key("A"), "x".to_string()).await;
    cache.set(&key("B"), "y".to_string()).await;
    cache.set(&key("C"), "z".to_string()).await;

    assert_eq!(cache.get(&key("A")).await, None);
    assert_eq!(cache.get(&key("B")).await, Some("y".to_string()));
    assert_eq!(cache.get(&key("C")).await, Some("z".to_string()));

    let stats = cache.stats().await;
    assert_eq!(stats.evictions_capacity, 1);
    assert_eq!(stats.entries, 2);
}

#[tokio::test]
async fn test_capacity_scenario_with_durable_tier() {
    let config = CacheConfig::builder()
        .ttl(Duration::from_millis(1000))
        .memory_capacity(2)
        .build();
    let cache = TieredCache::with_durable(config, Arc::new(MemoryStore::new()));

    cache.set(&key("A"), "x".to_string()).await;
    cache.set(&key("B"), "y".to_string()).await;
    cache.set(&key("C"), "z".to_string()).await;

    // evicted from memory but still durable, so it comes back
    assert_eq!(cache.get(&key("A")).await, Some("x".to_string()));
    assert_eq!(cache.stats().await.durable_hits, 1);
    assert_eq!(cache.len().await, 2);
}

#[tokio::test]
async fn test_repeated_get_is_stable_until_expiry() {
    let config = CacheConfig::builder()
        .ttl(Duration::from_millis(200))
        .build();
    let cache = TieredCache::with_durable(config, Arc::new(MemoryStore::new()));

    cache.set(&key("q"), "answer".to_string()).await;
    for _ in 0..5 {
        assert_eq!(cache.get(&key("q")).await, Some("answer".to_string()));
    }

    tokio::time::sleep(Duration::from_millis(300)).await;

    // expired in both tiers
    assert_eq!(cache.get(&key("q")).await, None);
    assert_eq!(cache.get(&key("q")).await, None);
}

#[tokio::test]
async fn test_overwrite_resets_value() {
    let cache = TieredCache::new(CacheConfig::default());

    cache.set(&key("q"), "first".to_string()).await;
    cache.set(&key("q"), "second".to_string()).await;

    assert_eq!(cache.get(&key("q")).await, Some("second".to_string()));
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn test_cleanup_expired_reports_event() {
    let config = CacheConfig::builder()
        .ttl(Duration::from_millis(50))
        .build();
    let cache = TieredCache::new(config);

    cache.set(&key("k1"), "v1".to_string()).await;
    cache.set(&key("k2"), "v2".to_string()).await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    let event = cache.cleanup_expired().await.unwrap();
    assert_eq!(event.reason, InvalidationReason::Expired);
    assert_eq!(event.len(), 2);
    assert!(cache.is_empty().await);
    assert!(cache.cleanup_expired().await.is_none());
}

#[tokio::test]
async fn test_auto_cleanup_task() {
    let config = CacheConfig::builder()
        .ttl(Duration::from_millis(30))
        .cleanup_interval(Duration::from_millis(20))
        .build();
    let cache = Arc::new(TieredCache::new(config));
    let handle = cache.spawn_auto_cleanup().unwrap();

    cache.set(&key("k1"), "v1".to_string()).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(cache.is_empty().await);
    assert!(cache.stats().await.evictions_ttl >= 1);

    drop(cache);
    // the sweep notices the cache is gone on its next tick
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_durable_tier_recovers_after_backoff() {
    let store = Arc::new(FlakyStore::default());
    let config = CacheConfig::builder()
        .durable_backoff(Duration::from_millis(50))
        .build();
    let cache = TieredCache::with_durable(config, store.clone());
    let mut failures = cache.subscribe_backend_failures();

    store.set_failing(true);
    cache.set(&key("a"), "x".to_string()).await;
    assert_eq!(failures.recv().await.unwrap().operation, BackendOperation::Write);

    // served from memory without touching the store
    assert_eq!(cache.get(&key("a")).await, Some("x".to_string()));
    assert_eq!(store.attempts.load(Ordering::SeqCst), 1);

    // writes are still attempted while reads are bypassed
    cache.set(&key("b"), "y".to_string()).await;
    assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(cache.unsynced_len(), 2);

    store.set_failing(false);
    tokio::time::sleep(Duration::from_millis(80)).await;

    cache.set(&key("c"), "z".to_string()).await;
    assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(store.inner.len().await, 1);
    assert_eq!(cache.stats().await.backend_errors, 2);

    assert_eq!(cache.sync_durable().await, 2);
    assert_eq!(cache.unsynced_len(), 0);
    assert_eq!(store.inner.len().await, 3);
}

#[tokio::test]
async fn test_overwritten_value_survives_eviction_after_outage() {
    let store = Arc::new(FlakyStore::default());
    let config = CacheConfig::builder()
        .memory_capacity(1)
        .durable_backoff(Duration::from_millis(50))
        .build();
    let cache = TieredCache::with_durable(config, store.clone());

    cache.set(&key("a"), "v1".to_string()).await;

    store.set_failing(true);
    assert_eq!(cache.get(&key("zz")).await, None);
    store.set_failing(false);

    cache.set(&key("a"), "v2".to_string()).await;
    cache.set(&key("b"), "x".to_string()).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(cache.get(&key("a")).await, Some("v2".to_string()));
}

#[tokio::test]
async fn test_removed_key_stays_gone_after_outage() {
    let store = Arc::new(FlakyStore::default());
    let config = CacheConfig::builder()
        .durable_backoff(Duration::from_millis(50))
        .build();
    let cache = TieredCache::with_durable(config, store.clone());

    cache.set(&key("a"), "v1".to_string()).await;

    store.set_failing(true);
    assert_eq!(cache.get(&key("zz")).await, None);
    cache.remove(&key("a")).await;
    store.set_failing(false);

    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(cache.get(&key("a")).await, None);
    assert!(store.inner.is_empty().await);
}

#[tokio::test]
async fn test_auto_cleanup_resyncs_durable_tier() {
    let store = Arc::new(FlakyStore::default());
    let config = CacheConfig::builder()
        .durable_backoff(Duration::from_millis(20))
        .cleanup_interval(Duration::from_millis(30))
        .build();
    let cache = Arc::new(TieredCache::with_durable(config, store.clone()));
    let handle = cache.spawn_auto_cleanup().unwrap();

    store.set_failing(true);
    cache.set(&key("a"), "x".to_string()).await;
    store.set_failing(false);

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(cache.unsynced_len(), 0);
    assert_eq!(store.inner.len().await, 1);

    drop(cache);
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_promotion_keeps_original_storage_time() {
    let durable = Arc::new(MemoryStore::new());
    let config = CacheConfig::builder()
        .ttl(Duration::from_millis(1000))
        .build();

    let stored_at = Utc::now() - chrono::Duration::milliseconds(800);
    let record = CacheEntry::with_stored_at(key("old"), "aged".to_string(), stored_at);
    durable
        .write(&key("old"), record.to_bytes().unwrap())
        .await
        .unwrap();

    let cache = TieredCache::with_durable(config, durable);
    assert_eq!(
        cache.get_with_tier(&key("old")).await,
        Some(("aged".to_string(), CacheTier::Durable))
    );
    assert!(cache.contains_key(&key("old")).await);

    // a fresh storage time would keep it alive for another second
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(cache.get(&key("old")).await, None);
    assert!(!cache.contains_key(&key("old")).await);
}

#[tokio::test]
async fn test_concurrent_gets_promote_once() {
    let durable = Arc::new(MemoryStore::new());
    let writer = TieredCache::with_durable(CacheConfig::default(), durable.clone());
    writer.set(&key("shared"), "value".to_string()).await;

    // fresh cache over the same durable tier
    let cache = Arc::new(TieredCache::with_durable(CacheConfig::default(), durable));

    let lookups = (0..16).map(|_| {
        let cache = cache.clone();
        async move { cache.get(&key("shared")).await }
    });
    let results = join_all(lookups).await;

    assert!(results.iter().all(|r| r.as_deref() == Some("value")));
    let stats = cache.stats().await;
    assert_eq!(stats.durable_hits, 1);
    assert_eq!(stats.memory_hits, 15);
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = TempDir::new().unwrap();

    {
        let cache = TieredCache::with_durable(
            CacheConfig::default(),
            Arc::new(FileStore::new(dir.path())),
        );
        cache.set(&key("persisted"), "from disk".to_string()).await;
    }

    let cache = TieredCache::with_durable(
        CacheConfig::default(),
        Arc::new(FileStore::new(dir.path())),
    );
    assert!(!cache.contains_key(&key("persisted")).await);
    assert_eq!(
        cache.get(&key("persisted")).await,
        Some("from disk".to_string())
    );
    assert!(cache.contains_key(&key("persisted")).await);

    cache.remove(&key("persisted")).await;
    let restarted = TieredCache::with_durable(
        CacheConfig::default(),
        Arc::new(FileStore::new(dir.path())),
    );
    assert_eq!(restarted.get(&key("persisted")).await, None);
}

#[tokio::test]
async fn test_clear_keeps_durable_records() {
    let durable = Arc::new(MemoryStore::new());
    let cache = TieredCache::with_durable(CacheConfig::default(), durable.clone());

    cache.set(&key("a"), "x".to_string()).await;
    cache.set(&key("b"), "y".to_string()).await;

    let event = cache.clear().await;
    assert_eq!(event.reason, InvalidationReason::Cleared);
    assert_eq!(event.len(), 2);
    assert!(cache.is_empty().await);
    assert_eq!(durable.len().await, 2);

    assert_eq!(cache.get(&key("a")).await, Some("x".to_string()));
}

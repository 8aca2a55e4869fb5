use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aicache_core::{
    handler_fn, AppConfig, BatchStats, CacheKey, CacheStats, CacheTier, CacheValue, CachedBatcher,
    FileStore, TieredCache,
};
use anyhow::{Context, Result};
use serde_json::Value;

/// Request parameters, ordered by name
pub type Params = BTreeMap<String, Value>;

/// Parse a `name=value` parameter; the value is read as JSON when it parses,
/// otherwise kept as a string
pub fn parse_param(raw: &str) -> std::result::Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(format!("parameter name is empty in '{}'", raw));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

pub fn collect_params(params: Vec<(String, Value)>) -> Params {
    params.into_iter().collect()
}

pub fn derive_key(model: &str, prompt: &str, params: &Params) -> Result<CacheKey> {
    CacheKey::derive(model, prompt, params).context("Failed to derive cache key")
}

/// Default location of the file-backed tier
pub fn default_data_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("aicache"))
        .unwrap_or_else(|| PathBuf::from("./aicache-data"))
}

/// Open a tiered cache over a file store rooted at `data_dir`
pub fn open_cache(data_dir: &Path, config: &AppConfig) -> TieredCache {
    TieredCache::with_durable(config.cache.clone(), Arc::new(FileStore::new(data_dir)))
}

/// Look up a cached response, failing when neither tier holds it
pub async fn lookup(cache: &TieredCache, key: &CacheKey) -> Result<(CacheValue, CacheTier)> {
    cache
        .get_with_tier(key)
        .await
        .with_context(|| format!("No cached response for {}", key.short()))
}

/// Outcome of a coalescing demo run
#[derive(Debug)]
pub struct DemoReport {
    pub requests: usize,
    pub distinct: usize,
    pub downstream_calls: usize,
    pub failures: usize,
    pub batch_stats: BatchStats,
    pub cache_stats: CacheStats,
}

/// Fire `requests` concurrent prompts over `distinct` values through a
/// cached batcher with an echo downstream
pub async fn run_demo(config: &AppConfig, requests: usize, distinct: usize) -> Result<DemoReport> {
    let distinct = distinct.max(1);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let cache = Arc::new(TieredCache::new(config.cache.clone()));
    let batcher = CachedBatcher::new(
        cache,
        config.batch.clone(),
        handler_fn(move |prompts: Vec<String>| {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::info!("Downstream call #{} with {} prompts", call, prompts.len());
            async move {
                Ok::<_, anyhow::Error>(
                    prompts
                        .into_iter()
                        .map(|p| format!("echo: {}", p))
                        .collect::<Vec<_>>(),
                )
            }
        }),
    );

    let params = Params::new();
    let tasks = (0..requests).map(|i| {
        let batcher = batcher.clone();
        let params = params.clone();
        tokio::spawn(async move {
            let prompt = format!("prompt #{}", i % distinct);
            batcher.request_for("demo-model", prompt, &params).await
        })
    });

    let mut failures = 0;
    for joined in futures::future::join_all(tasks).await {
        match joined.context("Demo task panicked")? {
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Demo request failed: {}", e);
                failures += 1;
            }
        }
    }

    Ok(DemoReport {
        requests,
        distinct,
        downstream_calls: calls.load(Ordering::SeqCst),
        failures,
        batch_stats: batcher.batch_stats(),
        cache_stats: batcher.cache_stats().await,
    })
}

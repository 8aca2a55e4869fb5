//! Cache in front of a batched downstream
//!
//! [`CachedBatcher`] answers from the [`TieredCache`] when it can and sends
//! misses through a [`RequestBatcher`]. Each batch writes its results into
//! the cache before any of its waiters is released, so a caller that sees a
//! result can immediately read it back from the cache.

use crate::batch::{BatchConfig, BatchHandler, BatchStats, RequestBatcher};
use crate::cache::{CacheKey, CacheStats, CacheValue, TieredCache};
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Wraps the downstream so every successful batch lands in the cache
struct CachingHandler<P> {
    cache: Arc<TieredCache>,
    downstream: Arc<dyn BatchHandler<P, CacheValue>>,
}

#[async_trait]
impl<P> BatchHandler<(CacheKey, P), CacheValue> for CachingHandler<P>
where
    P: Send + 'static,
{
    async fn call_batch(&self, items: Vec<(CacheKey, P)>) -> anyhow::Result<Vec<CacheValue>> {
        let (keys, payloads): (Vec<CacheKey>, Vec<P>) = items.into_iter().unzip();
        let results = self.downstream.call_batch(payloads).await?;

        // a short or long result set fails the whole batch in the coalescer
        if results.len() == keys.len() {
            for (key, value) in keys.iter().zip(&results) {
                self.cache.set(key, value.clone()).await;
            }
            debug!("Cached {} downstream results", results.len());
        }

        Ok(results)
    }
}

/// Tiered cache plus request coalescer for cache misses
pub struct CachedBatcher<P> {
    cache: Arc<TieredCache>,
    batcher: RequestBatcher<(CacheKey, P), CacheValue>,
}

impl<P> Clone for CachedBatcher<P> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            batcher: self.batcher.clone(),
        }
    }
}

impl<P> CachedBatcher<P>
where
    P: Send + 'static,
{
    /// Put `cache` in front of `downstream`
    pub fn new<H>(cache: Arc<TieredCache>, config: BatchConfig, downstream: H) -> Self
    where
        H: BatchHandler<P, CacheValue> + 'static,
    {
        let handler = CachingHandler {
            cache: cache.clone(),
            downstream: Arc::new(downstream),
        };

        Self {
            cache,
            batcher: RequestBatcher::new(config, handler),
        }
    }

    /// Answer from the cache, or join the open batch on a miss
    pub async fn request(&self, key: CacheKey, payload: P) -> Result<CacheValue> {
        if let Some(value) = self.cache.get(&key).await {
            return Ok(value);
        }

        let value = self.batcher.request(key, (key, payload)).await?;
        Ok(value)
    }

    /// Derive the key from the request, then behave like [`request`](Self::request)
    ///
    /// A request that cannot be fingerprinted fails before reaching the cache
    /// or the batcher.
    pub async fn request_for<Q>(&self, model: &str, payload: P, params: &Q) -> Result<CacheValue>
    where
        P: Serialize,
        Q: Serialize + ?Sized,
    {
        let key = CacheKey::derive(model, &payload, params)?;
        self.request(key, payload).await
    }

    /// The underlying cache
    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// Force the open batch out now
    pub async fn flush(&self) -> usize {
        self.batcher.flush().await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub fn batch_stats(&self) -> BatchStats {
        self.batcher.stats()
    }
}

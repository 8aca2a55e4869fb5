//! # aicache-core
//!
//! Response caching and request coalescing for model inference calls.
//!
//! ## Features
//!
//! - Deterministic request fingerprints ([`CacheKey`])
//! - Tiered cache: bounded in-process tier in front of a pluggable durable tier
//! - TTL expiry and oldest-first eviction
//! - Durable tier failures degrade to in-process operation instead of failing callers
//! - Request coalescer that turns concurrent calls into one batched downstream call
//! - [`CachedBatcher`] combining the two: cache hits short-circuit, misses are batched
//!
//! ## Tiered Cache
//!
//! ```no_run
//! use aicache_core::{CacheConfig, CacheKey, FileStore, TieredCache};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = TieredCache::with_durable(
//!         CacheConfig::default(),
//!         Arc::new(FileStore::new("/var/cache/aicache")),
//!     );
//!
//!     let key = CacheKey::derive("gpt-4o", "Summarize this", &())?;
//!     cache.set(&key, "A summary".to_string()).await;
//!     assert_eq!(cache.get(&key).await.as_deref(), Some("A summary"));
//!     Ok(())
//! }
//! ```
//!
//! ## Cached Batching
//!
//! ```no_run
//! use aicache_core::{handler_fn, BatchConfig, CacheConfig, CachedBatcher, TieredCache};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = Arc::new(TieredCache::new(CacheConfig::default()));
//!     let batcher = CachedBatcher::new(
//!         cache,
//!         BatchConfig::default(),
//!         handler_fn(|prompts: Vec<String>| async move {
//!             // one call to the model provider for the whole batch
//!             Ok::<_, anyhow::Error>(prompts.iter().map(|p| format!("answer to {}", p)).collect::<Vec<_>>())
//!         }),
//!     );
//!
//!     let answer = batcher.request_for("gpt-4o", "hello".to_string(), &()).await?;
//!     println!("{}", answer);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod integration;

// Re-export main types for convenience
pub use batch::{
    handler_fn, BatchConfig, BatchConfigBuilder, BatchHandler, BatchStats, FlushTrigger,
    PendingResult, RequestBatcher,
};
pub use cache::{
    BackendFailure, BackendOperation, CacheConfig, CacheConfigBuilder, CacheEntry, CacheKey,
    CacheKeyBuilder, CacheStats, CacheTier, CacheValue, DurableStore, FileStore,
    InvalidationEvent, InvalidationReason, MemoryStore, TieredCache,
};
pub use config::AppConfig;
pub use error::{BatchError, CacheError, Result};
pub use integration::CachedBatcher;

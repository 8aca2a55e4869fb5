//! # Tiered Response Cache
//!
//! Maps a deterministic request fingerprint to a cached model response.
//!
//! ## Features
//!
//! - **Deterministic Keys**: SHA-256 over the model id and canonical JSON of payload and parameters
//! - **TTL-Based Expiration**: entries older than the TTL are never returned
//! - **Bounded In-Process Tier**: oldest-inserted entry is evicted at capacity
//! - **Durable Tier**: pluggable [`DurableStore`] with promotion on hit
//! - **Non-Fatal Backends**: durable failures are logged, counted and published, never raised
//!
//! ## Example
//!
//! ```rust
//! use aicache_core::cache::{CacheConfig, CacheKey, MemoryStore, TieredCache};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CacheConfig::builder()
//!     .ttl(Duration::from_secs(3600))
//!     .memory_capacity(1_000)
//!     .build();
//!
//! let cache = TieredCache::with_durable(config, Arc::new(MemoryStore::new()));
//!
//! let key = CacheKey::derive("gpt-4o", "What is Rust?", &serde_json::json!({"temperature": 0.2}))?;
//! cache.set(&key, "A systems language".to_string()).await;
//!
//! if let Some(value) = cache.get(&key).await {
//!     println!("Cache hit: {}", value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod durable;
pub mod entry;
pub mod invalidation;
pub mod key;
pub mod memory;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use durable::{DurableStore, FileStore, MemoryStore};
pub use entry::CacheEntry;
pub use invalidation::{InvalidationEvent, InvalidationReason};
pub use key::{CacheKey, CacheKeyBuilder};
pub use memory::MemoryTier;
pub use store::{start_auto_cleanup, BackendFailure, BackendOperation, TieredCache};
pub use types::{CacheStats, CacheTier, CacheValue};

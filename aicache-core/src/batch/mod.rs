//! # Request Coalescing
//!
//! Groups concurrently issued requests into a single downstream call and
//! hands every caller its own result, or the failure shared by its batch.
//!
//! ## Example
//!
//! ```rust
//! use aicache_core::batch::{handler_fn, BatchConfig, RequestBatcher};
//! use aicache_core::CacheKey;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = BatchConfig::builder()
//!     .batch_size(3)
//!     .debounce_interval(Duration::from_millis(50))
//!     .build();
//!
//! let batcher = RequestBatcher::new(
//!     config,
//!     handler_fn(|prompts: Vec<String>| async move {
//!         Ok::<_, anyhow::Error>(prompts.into_iter().map(|p| p.to_uppercase()).collect::<Vec<_>>())
//!     }),
//! );
//!
//! let key = CacheKey::derive("gpt-4o", "hello", &())?;
//! let answer = batcher.request(key, "hello".to_string()).await?;
//! assert_eq!(answer, "HELLO");
//! # Ok(())
//! # }
//! ```

pub mod coalescer;
pub mod config;
pub mod handler;

pub use coalescer::{BatchStats, FlushTrigger, PendingResult, RequestBatcher};
pub use config::{BatchConfig, BatchConfigBuilder};
pub use handler::{handler_fn, BatchHandler, FnHandler};

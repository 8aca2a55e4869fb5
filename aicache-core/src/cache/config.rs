//! Configuration for the tiered cache

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the tiered cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries older than this are treated as absent in both tiers
    pub ttl: Duration,

    /// Maximum number of entries in the in-process tier
    pub memory_capacity: usize,

    /// How long the durable tier is bypassed after a backend failure
    /// (zero keeps using it on every call)
    pub durable_backoff: Duration,

    /// Enable the periodic sweep of expired in-process entries
    pub enable_auto_cleanup: bool,

    /// Interval between sweeps
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            memory_capacity: 1_000,
            durable_backoff: Duration::from_secs(5),
            enable_auto_cleanup: true,
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_capacity == 0 {
            return Err("memory_capacity must be greater than 0".to_string());
        }

        if self.ttl.is_zero() {
            return Err("ttl must be greater than 0".to_string());
        }

        if self.enable_auto_cleanup && self.cleanup_interval.is_zero() {
            return Err("cleanup_interval must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    ttl: Option<Duration>,
    memory_capacity: Option<usize>,
    durable_backoff: Option<Duration>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
}

impl CacheConfigBuilder {
    /// Set the entry time-to-live
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the in-process tier capacity
    pub fn memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = Some(capacity);
        self
    }

    /// Set the durable tier bypass window after a failure
    pub fn durable_backoff(mut self, backoff: Duration) -> Self {
        self.durable_backoff = Some(backoff);
        self
    }

    /// Enable or disable automatic cleanup
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            ttl: self.ttl.unwrap_or(defaults.ttl),
            memory_capacity: self.memory_capacity.unwrap_or(defaults.memory_capacity),
            durable_backoff: self.durable_backoff.unwrap_or(defaults.durable_backoff),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
        }
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Short-lived responses for rapidly changing prompts
    pub fn realtime() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            memory_capacity: 500,
            cleanup_interval: Duration::from_secs(60),
            ..Default::default()
        }
    }

    /// Memory-constrained environments
    pub fn small() -> Self {
        Self {
            ttl: Duration::from_secs(1800),
            memory_capacity: 100,
            ..Default::default()
        }
    }

    /// Large deployments with a hot working set
    pub fn large() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            memory_capacity: 100_000,
            cleanup_interval: Duration::from_secs(900),
            ..Default::default()
        }
    }
}

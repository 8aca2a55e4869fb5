//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;

pub use crate::cache::key::CacheKey;

/// Cache value type - the opaque downstream response payload
pub type CacheValue = String;

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Hits served from the in-process tier
    pub memory_hits: u64,

    /// Hits served from the durable tier (each one is a promotion)
    pub durable_hits: u64,

    /// Lookups that found nothing usable in either tier
    pub misses: u64,

    /// Number of entries currently in the in-process tier
    pub entries: usize,

    /// Approximate footprint of the in-process tier
    pub size_bytes: usize,

    /// Number of successful `set` calls
    pub writes: u64,

    /// Evictions caused by the in-process capacity limit
    pub evictions_capacity: u64,

    /// Evictions caused by TTL expiration
    pub evictions_ttl: u64,

    /// Manual removals
    pub invalidations: u64,

    /// Durable tier failures (read, write, remove or decode)
    pub backend_errors: u64,
}

impl CacheStats {
    /// Total hits across both tiers
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.durable_hits
    }

    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits() as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Calculate total evictions
    pub fn total_evictions(&self) -> u64 {
        self.evictions_capacity + self.evictions_ttl
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {} (memory {}, durable {}), misses: {}, hit_rate: {:.2}%, entries: {} ({} bytes), evictions: {}, backend_errors: {} }}",
            self.hits(),
            self.memory_hits,
            self.durable_hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.size_bytes,
            self.total_evictions(),
            self.backend_errors
        )
    }
}

/// Cache tier a lookup was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheTier {
    /// Bounded in-process tier
    Memory,

    /// Unbounded durable tier
    Durable,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Memory => write!(f, "memory"),
            CacheTier::Durable => write!(f, "durable"),
        }
    }
}

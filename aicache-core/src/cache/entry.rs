//! Cache entry management with TTL support

use crate::cache::types::{CacheKey, CacheValue};
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cached response and the moment it was stored
///
/// The same shape is used in memory and, serialized as JSON, as the durable
/// record, so an entry keeps its age across a process restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The cached value
    pub value: CacheValue,

    /// When the value was stored
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a new entry stored now
    pub fn new(key: CacheKey, value: CacheValue) -> Self {
        Self::with_stored_at(key, value, Utc::now())
    }

    /// Create an entry with an explicit storage time
    pub fn with_stored_at(key: CacheKey, value: CacheValue, stored_at: DateTime<Utc>) -> Self {
        Self {
            key,
            value,
            stored_at,
        }
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.stored_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }

    /// An entry is expired once its age exceeds the TTL
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }

    /// Approximate in-memory footprint
    pub fn size_bytes(&self) -> usize {
        self.value.len() + std::mem::size_of::<Self>()
    }

    /// Encode as a durable record
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a durable record, checking that it belongs to `expected`
    pub fn from_bytes(expected: &CacheKey, bytes: &[u8]) -> Result<Self> {
        let entry: CacheEntry = serde_json::from_slice(bytes).map_err(|e| {
            CacheError::backend("decode", format!("malformed record for {}: {}", expected, e))
        })?;

        if entry.key != *expected {
            return Err(CacheError::backend(
                "decode",
                format!("record for {} holds key {}", expected, entry.key),
            ));
        }

        Ok(entry)
    }
}

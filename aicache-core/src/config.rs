//! Application configuration assembled from environment variables

use crate::batch::BatchConfig;
use crate::cache::CacheConfig;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const ENV_TTL_SECS: &str = "AICACHE_TTL_SECS";
pub const ENV_MEMORY_CAPACITY: &str = "AICACHE_MEMORY_CAPACITY";
pub const ENV_BATCH_SIZE: &str = "AICACHE_BATCH_SIZE";
pub const ENV_DEBOUNCE_MS: &str = "AICACHE_DEBOUNCE_MS";
pub const ENV_DURABLE_BACKOFF_MS: &str = "AICACHE_DURABLE_BACKOFF_MS";

/// Cache and coalescer settings consumed at construction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub batch: BatchConfig,
}

impl AppConfig {
    /// Load a `.env` file if one is present, then read the environment
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_env()
    }

    /// Read overrides from the process environment
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read overrides through `lookup`, which returns the raw value of a variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_TTL_SECS)? {
            config.cache.ttl = Duration::from_secs(secs);
        }
        if let Some(capacity) = parse_var::<usize, _>(&lookup, ENV_MEMORY_CAPACITY)? {
            config.cache.memory_capacity = capacity;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_DURABLE_BACKOFF_MS)? {
            config.cache.durable_backoff = Duration::from_millis(ms);
        }
        if let Some(size) = parse_var::<usize, _>(&lookup, ENV_BATCH_SIZE)? {
            config.batch.batch_size = size;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_DEBOUNCE_MS)? {
            config.batch.debounce_interval = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate both sections
    pub fn validate(&self) -> Result<()> {
        self.cache.validate().map_err(CacheError::ConfigError)?;
        self.batch.validate().map_err(CacheError::ConfigError)?;
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            CacheError::ConfigError(format!("{} has invalid value '{}': {}", name, raw, e))
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            (ENV_TTL_SECS, "1"),
            (ENV_MEMORY_CAPACITY, "2"),
            (ENV_BATCH_SIZE, "3"),
            (ENV_DEBOUNCE_MS, "50"),
            (ENV_DURABLE_BACKOFF_MS, "0"),
        ]))
        .unwrap();

        assert_eq!(config.cache.ttl, Duration::from_secs(1));
        assert_eq!(config.cache.memory_capacity, 2);
        assert_eq!(config.cache.durable_backoff, Duration::ZERO);
        assert_eq!(config.batch.batch_size, 3);
        assert_eq!(config.batch.debounce_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_unparseable_value() {
        let err = AppConfig::from_lookup(lookup_from(&[(ENV_BATCH_SIZE, "lots")])).unwrap_err();
        assert!(matches!(err, CacheError::ConfigError(_)));
        assert!(err.to_string().contains(ENV_BATCH_SIZE));
    }

    #[test]
    fn test_invalid_value() {
        let err = AppConfig::from_lookup(lookup_from(&[(ENV_MEMORY_CAPACITY, "0")])).unwrap_err();
        assert!(matches!(err, CacheError::ConfigError(_)));
    }
}

//! Configuration for the request coalescer

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for batching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// A batch is flushed as soon as it holds this many distinct keys
    pub batch_size: usize,

    /// A batch is flushed this long after it was opened, even if not full
    pub debounce_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            debounce_interval: Duration::from_millis(100),
        }
    }
}

impl BatchConfig {
    /// Create a new builder for batch configuration
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".to_string());
        }

        if self.debounce_interval.is_zero() {
            return Err("debounce_interval must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Builder for batch configuration
#[derive(Debug, Default)]
pub struct BatchConfigBuilder {
    batch_size: Option<usize>,
    debounce_interval: Option<Duration>,
}

impl BatchConfigBuilder {
    /// Set the size threshold
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set the debounce interval
    pub fn debounce_interval(mut self, interval: Duration) -> Self {
        self.debounce_interval = Some(interval);
        self
    }

    /// Build the batch configuration
    pub fn build(self) -> BatchConfig {
        let defaults = BatchConfig::default();

        BatchConfig {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            debounce_interval: self.debounce_interval.unwrap_or(defaults.debounce_interval),
        }
    }
}

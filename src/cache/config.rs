//! Configuration for the in-memory cache store
//!
//! Expirations are supplied per write by the repositories, so this only
//! bounds memory and controls housekeeping.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`crate::cache::InMemoryCache`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache
    pub max_entries: usize,

    /// Maximum total size of cached data in bytes
    pub max_size_bytes: usize,

    /// Enable automatic cleanup of expired entries
    pub enable_auto_cleanup: bool,

    /// Interval for automatic cleanup checks
    pub cleanup_interval: Duration,

    /// When true, least recently used entries are evicted first;
    /// otherwise the oldest write goes first
    pub enable_lru_eviction: bool,

    /// Enable size statistics collection
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            // 100 MB
            max_size_bytes: 100 * 1024 * 1024,
            enable_auto_cleanup: true,
            // Cleanup every 5 minutes
            cleanup_interval: Duration::from_secs(300),
            enable_lru_eviction: true,
            enable_metrics: true,
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
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }

        if self.max_size_bytes == 0 {
            return Err("max_size_bytes must be greater than 0".to_string());
        }

        if self.enable_auto_cleanup && self.cleanup_interval.is_zero() {
            return Err("cleanup_interval must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Configuration for memory-constrained environments
    pub fn small() -> Self {
        Self {
            max_entries: 1_000,
            max_size_bytes: 10 * 1024 * 1024, // 10 MB
            ..Default::default()
        }
    }

    /// Configuration for large deployments
    pub fn large() -> Self {
        Self {
            max_entries: 1_000_000,
            max_size_bytes: 2 * 1024 * 1024 * 1024, // 2 GB
            cleanup_interval: Duration::from_secs(60),
            ..Default::default()
        }
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    max_entries: Option<usize>,
    max_size_bytes: Option<usize>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
    enable_lru_eviction: Option<bool>,
    enable_metrics: Option<bool>,
}

impl CacheConfigBuilder {
    /// Set maximum number of cache entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set maximum cache size in bytes
    pub fn max_size_bytes(mut self, size: usize) -> Self {
        self.max_size_bytes = Some(size);
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

    /// Enable or disable LRU eviction
    pub fn enable_lru_eviction(mut self, enable: bool) -> Self {
        self.enable_lru_eviction = Some(enable);
        self
    }

    /// Enable or disable metrics collection
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            max_size_bytes: self.max_size_bytes.unwrap_or(defaults.max_size_bytes),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            enable_lru_eviction: self
                .enable_lru_eviction
                .unwrap_or(defaults.enable_lru_eviction),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
        }
    }
}

//! Repository configuration
//!
//! Built once by the host process and shared by reference with every
//! repository. Nothing here is mutated after construction.

use crate::error::{RepositoryError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable toggling the read-through cache
pub const ENV_ENABLE_CACHE: &str = "REPOSITORY_ENABLE_CACHE";
/// Environment variable holding the default cache TTL in seconds
pub const ENV_CACHE_TTL_SECS: &str = "REPOSITORY_CACHE_TTL_SECS";
/// Environment variable holding the index name prefix
pub const ENV_INDEX_PREFIX: &str = "REPOSITORY_INDEX_PREFIX";
/// Environment variable holding the stacking version
pub const ENV_STACKING_VERSION: &str = "REPOSITORY_STACKING_VERSION";

/// Configuration shared by all repositories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Whether read-through caching is enabled at all
    pub enable_cache: bool,

    /// TTL used when a caller does not pass one
    pub default_cache_ttl: Duration,

    /// Random variation applied to the default TTL (0.0 - 1.0)
    pub cache_ttl_jitter: f64,

    /// Prefix prepended to every physical index name (e.g. "dev-")
    pub index_prefix: String,

    /// Version suffix of physical index names
    pub index_version: u32,

    /// Version component of stack signature cache keys
    pub stacking_version: u32,

    /// Ids created before this instant are treated as unresolvable
    pub epoch_floor: DateTime<Utc>,

    /// Conflict retries the backend performs for counter updates
    pub counter_update_retries: u32,

    /// Delay applied to change notifications emitted by counter increments
    pub increment_notification_delay: Duration,

    /// Number of buckets returned by simple aggregations
    pub aggregation_bucket_limit: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            // 5 minutes
            default_cache_ttl: Duration::from_secs(300),
            cache_ttl_jitter: 0.1,
            index_prefix: String::new(),
            index_version: 1,
            stacking_version: 1,
            epoch_floor: default_epoch_floor(),
            counter_update_retries: 3,
            increment_notification_delay: Duration::from_millis(1500),
            aggregation_bucket_limit: 10,
        }
    }
}

fn default_epoch_floor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2014, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

impl RepositoryConfig {
    /// Create a new builder for repository configuration
    pub fn builder() -> RepositoryConfigBuilder {
        RepositoryConfigBuilder::default()
    }

    /// Build a configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    /// Unset variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = Self::builder();

        if let Ok(value) = std::env::var(ENV_ENABLE_CACHE) {
            let enabled = parse_bool(&value).ok_or_else(|| {
                RepositoryError::ConfigError(format!("{} must be a boolean, got {:?}", ENV_ENABLE_CACHE, value))
            })?;
            builder = builder.enable_cache(enabled);
        }

        if let Ok(value) = std::env::var(ENV_CACHE_TTL_SECS) {
            let secs: u64 = value.trim().parse().map_err(|_| {
                RepositoryError::ConfigError(format!("{} must be a number of seconds, got {:?}", ENV_CACHE_TTL_SECS, value))
            })?;
            builder = builder.default_cache_ttl(Duration::from_secs(secs));
        }

        if let Ok(value) = std::env::var(ENV_INDEX_PREFIX) {
            builder = builder.index_prefix(value.trim());
        }

        if let Ok(value) = std::env::var(ENV_STACKING_VERSION) {
            let version: u32 = value.trim().parse().map_err(|_| {
                RepositoryError::ConfigError(format!("{} must be an integer, got {:?}", ENV_STACKING_VERSION, value))
            })?;
            builder = builder.stacking_version(version);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_cache_ttl.is_zero() {
            return Err(RepositoryError::ConfigError(
                "default_cache_ttl must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.cache_ttl_jitter) {
            return Err(RepositoryError::ConfigError(
                "cache_ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.aggregation_bucket_limit == 0 {
            return Err(RepositoryError::ConfigError(
                "aggregation_bucket_limit must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Default TTL with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.cache_ttl_jitter == 0.0 {
            return self.default_cache_ttl;
        }

        let base_secs = self.default_cache_ttl.as_secs_f64();
        let jitter_range = base_secs * self.cache_ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Duration::from_secs_f64(final_secs)
    }

    /// Absolute expiration for a cache write, using `ttl` or the default.
    ///
    /// TTLs past the representable range expire at `DateTime::MAX_UTC`.
    pub fn expires_at(&self, ttl: Option<Duration>) -> DateTime<Utc> {
        let ttl = ttl.unwrap_or_else(|| self.ttl_with_jitter());
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Builder for repository configuration
#[derive(Debug, Default)]
pub struct RepositoryConfigBuilder {
    enable_cache: Option<bool>,
    default_cache_ttl: Option<Duration>,
    cache_ttl_jitter: Option<f64>,
    index_prefix: Option<String>,
    index_version: Option<u32>,
    stacking_version: Option<u32>,
    epoch_floor: Option<DateTime<Utc>>,
    counter_update_retries: Option<u32>,
    increment_notification_delay: Option<Duration>,
    aggregation_bucket_limit: Option<usize>,
}

impl RepositoryConfigBuilder {
    /// Enable or disable read-through caching
    pub fn enable_cache(mut self, enable: bool) -> Self {
        self.enable_cache = Some(enable);
        self
    }

    /// Set default TTL for cache entries
    pub fn default_cache_ttl(mut self, ttl: Duration) -> Self {
        self.default_cache_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn cache_ttl_jitter(mut self, jitter: f64) -> Self {
        self.cache_ttl_jitter = Some(jitter);
        self
    }

    /// Set the physical index prefix
    pub fn index_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.index_prefix = Some(prefix.into());
        self
    }

    /// Set the index version suffix
    pub fn index_version(mut self, version: u32) -> Self {
        self.index_version = Some(version);
        self
    }

    /// Set the stacking version used in signature cache keys
    pub fn stacking_version(mut self, version: u32) -> Self {
        self.stacking_version = Some(version);
        self
    }

    /// Set the earliest plausible id creation time
    pub fn epoch_floor(mut self, floor: DateTime<Utc>) -> Self {
        self.epoch_floor = Some(floor);
        self
    }

    /// Set the conflict retries for counter updates
    pub fn counter_update_retries(mut self, retries: u32) -> Self {
        self.counter_update_retries = Some(retries);
        self
    }

    /// Set the notification delay for counter increments
    pub fn increment_notification_delay(mut self, delay: Duration) -> Self {
        self.increment_notification_delay = Some(delay);
        self
    }

    /// Set the bucket limit for simple aggregations
    pub fn aggregation_bucket_limit(mut self, limit: usize) -> Self {
        self.aggregation_bucket_limit = Some(limit);
        self
    }

    /// Build the repository configuration
    pub fn build(self) -> RepositoryConfig {
        let defaults = RepositoryConfig::default();

        RepositoryConfig {
            enable_cache: self.enable_cache.unwrap_or(defaults.enable_cache),
            default_cache_ttl: self.default_cache_ttl.unwrap_or(defaults.default_cache_ttl),
            cache_ttl_jitter: self.cache_ttl_jitter.unwrap_or(defaults.cache_ttl_jitter),
            index_prefix: self.index_prefix.unwrap_or(defaults.index_prefix),
            index_version: self.index_version.unwrap_or(defaults.index_version),
            stacking_version: self.stacking_version.unwrap_or(defaults.stacking_version),
            epoch_floor: self.epoch_floor.unwrap_or(defaults.epoch_floor),
            counter_update_retries: self
                .counter_update_retries
                .unwrap_or(defaults.counter_update_retries),
            increment_notification_delay: self
                .increment_notification_delay
                .unwrap_or(defaults.increment_notification_delay),
            aggregation_bucket_limit: self
                .aggregation_bucket_limit
                .unwrap_or(defaults.aggregation_bucket_limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RepositoryConfig::default();
        assert!(config.enable_cache);
        assert_eq!(config.default_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.counter_update_retries, 3);
        assert_eq!(config.increment_notification_delay, Duration::from_millis(1500));
        assert_eq!(config.aggregation_bucket_limit, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut invalid = RepositoryConfig::default();
        invalid.cache_ttl_jitter = 1.5;
        assert!(invalid.validate().is_err());

        let mut invalid = RepositoryConfig::default();
        invalid.default_cache_ttl = Duration::ZERO;
        assert!(invalid.validate().is_err());

        let mut invalid = RepositoryConfig::default();
        invalid.aggregation_bucket_limit = 0;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = RepositoryConfig::builder()
            .enable_cache(false)
            .default_cache_ttl(Duration::from_secs(60))
            .index_prefix("test-")
            .stacking_version(2)
            .build();

        assert!(!config.enable_cache);
        assert_eq!(config.default_cache_ttl, Duration::from_secs(60));
        assert_eq!(config.index_prefix, "test-");
        assert_eq!(config.stacking_version, 2);
        assert_eq!(config.index_version, 1);
    }

    #[test]
    fn test_ttl_with_jitter() {
        let config = RepositoryConfig::builder()
            .default_cache_ttl(Duration::from_secs(3600))
            .cache_ttl_jitter(0.1)
            .build();

        let ttl = config.ttl_with_jitter();
        assert!(ttl.as_secs_f64() >= 3600.0 - 360.0);
        assert!(ttl.as_secs_f64() <= 3600.0 + 360.0);

        let exact = RepositoryConfig::builder().cache_ttl_jitter(0.0).build();
        assert_eq!(exact.ttl_with_jitter(), exact.default_cache_ttl);
    }

    #[test]
    fn test_expires_at_prefers_explicit_ttl() {
        let config = RepositoryConfig::default();
        let expires = config.expires_at(Some(Duration::from_secs(10)));
        let delta = expires - Utc::now();
        assert!(delta <= chrono::Duration::seconds(10));
        assert!(delta > chrono::Duration::seconds(8));
    }

    #[test]
    fn test_expires_at_clamps_huge_ttl() {
        let config = RepositoryConfig::default();

        // Fits a chrono duration but overflows the calendar
        let past_calendar = config.expires_at(Some(Duration::from_secs(10_000_000_000_000)));
        assert_eq!(past_calendar, DateTime::<Utc>::MAX_UTC);

        // Too large for a chrono duration at all
        let past_duration = config.expires_at(Some(Duration::from_secs(u64::MAX)));
        assert_eq!(past_duration, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}

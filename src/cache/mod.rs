//! # Read-through cache
//!
//! Repositories talk to the cache through the [`CacheClient`] port: a
//! key/value store whose entries carry an absolute expiration. Values are
//! serialized JSON and keys are always scoped per document type (see
//! [`key::scoped_key`]).
//!
//! [`InMemoryCache`] is the bundled implementation, with LRU and size based
//! eviction plus a periodic sweep of expired entries.
//!
//! ## Example
//!
//! ```rust
//! use stack_repository::cache::{CacheClient, CacheConfig, InMemoryCache};
//! use chrono::{Duration, Utc};
//!
//! # async fn example() -> stack_repository::Result<()> {
//! let cache = InMemoryCache::new(CacheConfig::builder().max_entries(10_000).build());
//!
//! cache.set("Stack-5e1e56000000000000000001", "{}".to_string(), Utc::now() + Duration::minutes(5)).await?;
//!
//! if let Some(value) = cache.get("Stack-5e1e56000000000000000001").await? {
//!     println!("Cache hit: {}", value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod key;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::{CacheEntry, CacheMetadata};
pub use key::{count_key, scoped_key, type_prefix};
pub use store::{start_auto_cleanup, InMemoryCache};
pub use types::{CacheKey, CacheStats, CacheValue};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Key/value cache with absolute expirations
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Fetch a live value
    async fn get(&self, key: &str) -> Result<Option<CacheValue>>;

    /// Store `value` until `expires_at`
    async fn set(&self, key: &str, value: CacheValue, expires_at: DateTime<Utc>) -> Result<()>;

    /// Remove one key, returning whether it was present
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Remove several keys, returning how many were present
    async fn remove_all(&self, keys: &[String]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.remove(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every key starting with `prefix`
    async fn remove_by_prefix(&self, prefix: &str) -> Result<usize>;
}

//! Cache entry with absolute expiration

use crate::cache::types::{CacheKey, CacheValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cache entry and its bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The cached value
    pub value: CacheValue,

    /// Entry metadata
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    /// Create an entry that expires at `expires_at`
    pub fn new(key: CacheKey, value: CacheValue, expires_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        let mut entry = Self {
            key,
            value,
            metadata: CacheMetadata {
                created_at: now,
                accessed_at: now,
                expires_at,
                access_count: 0,
                size_bytes: 0,
            },
        };
        entry.metadata.size_bytes = entry.calculate_size();
        entry
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.metadata.expires_at
    }

    /// Get time until expiration
    pub fn time_until_expiration(&self) -> Option<Duration> {
        (self.metadata.expires_at - Utc::now()).to_std().ok()
    }

    /// Mark the entry as accessed (updates access time and count)
    pub fn mark_accessed(&mut self) {
        self.metadata.accessed_at = Utc::now();
        self.metadata.access_count += 1;
    }

    /// Approximate size: key + value + metadata overhead
    pub fn calculate_size(&self) -> usize {
        self.key.len() + self.value.len() + std::mem::size_of::<CacheMetadata>()
    }
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the entry was written
    pub created_at: DateTime<Utc>,

    /// Last access time
    pub accessed_at: DateTime<Utc>,

    /// When the entry expires
    pub expires_at: DateTime<Utc>,

    /// Number of hits served by this entry
    pub access_count: u64,

    /// Size of the entry in bytes
    pub size_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_entry_creation() {
        let entry = CacheEntry::new(
            "Stack-abc".to_string(),
            "{}".to_string(),
            Utc::now() + chrono::Duration::hours(1),
        );

        assert_eq!(entry.key, "Stack-abc");
        assert!(!entry.is_expired());
        assert!(entry.metadata.size_bytes >= "Stack-abc".len() + 2);
        assert!(entry.time_until_expiration().is_some());
    }

    #[test]
    fn test_entry_in_the_past_is_expired() {
        let entry = CacheEntry::new(
            "key".to_string(),
            "value".to_string(),
            Utc::now() - chrono::Duration::seconds(1),
        );

        assert!(entry.is_expired());
        assert!(entry.time_until_expiration().is_none());
    }

    #[test]
    fn test_mark_accessed() {
        let mut entry = CacheEntry::new(
            "key".to_string(),
            "value".to_string(),
            Utc::now() + chrono::Duration::hours(1),
        );

        entry.mark_accessed();
        entry.mark_accessed();
        assert_eq!(entry.metadata.access_count, 2);
        assert!(entry.metadata.accessed_at >= entry.metadata.created_at);
    }
}

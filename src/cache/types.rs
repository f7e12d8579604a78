//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key type; always a scoped key built by [`crate::cache::key`]
pub type CacheKey = String;

/// Cache value type; serialized JSON of a document or result set
pub type CacheValue = String;

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheStats {
    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Number of entries currently in cache
    pub entries: usize,

    /// Total size of cached data in bytes
    pub size_bytes: usize,

    /// Number of evictions due to size limits
    pub evictions_size: u64,

    /// Number of evictions due to expiration
    pub evictions_ttl: u64,

    /// Number of explicit removals
    pub invalidations: u64,

    /// Average cache entry size in bytes
    pub avg_entry_size: usize,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Calculate total evictions
    pub fn total_evictions(&self) -> u64 {
        self.evictions_size + self.evictions_ttl
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, size: {} bytes, evictions: {}, invalidations: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.size_bytes,
            self.total_evictions(),
            self.invalidations
        )
    }
}

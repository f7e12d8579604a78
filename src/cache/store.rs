//! In-memory cache store with expiration and LRU eviction

use crate::cache::{
    config::CacheConfig,
    entry::CacheEntry,
    types::{CacheKey, CacheStats, CacheValue},
    CacheClient,
};
use crate::error::{RepositoryError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Key/value cache held in process memory
///
/// Entries carry the absolute expiration supplied by the writer. When
/// limits are reached the least recently used entry is evicted.
pub struct InMemoryCache {
    pub(crate) config: CacheConfig,

    store: Arc<RwLock<CacheStore>>,

    /// When set, every operation fails with this message
    failure: std::sync::RwLock<Option<String>>,
}

struct CacheStore {
    entries: HashMap<CacheKey, CacheEntry>,

    /// Access order, least recent first
    lru_queue: VecDeque<CacheKey>,

    stats: CacheStats,

    current_size_bytes: usize,
}

impl InMemoryCache {
    /// Create a new cache with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        info!("Initializing in-memory cache with config: {:?}", config);

        let store = CacheStore {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            stats: CacheStats::default(),
            current_size_bytes: 0,
        };

        Self {
            config,
            store: Arc::new(RwLock::new(store)),
            failure: std::sync::RwLock::new(None),
        }
    }

    /// Make every subsequent operation fail, or clear the failure with `None`
    pub fn set_failure(&self, message: Option<&str>) {
        if let Ok(mut failure) = self.failure.write() {
            *failure = message.map(str::to_string);
        }
    }

    fn check_failure(&self) -> Result<()> {
        match self.failure.read() {
            Ok(failure) => match failure.as_ref() {
                Some(message) => Err(RepositoryError::Cache(message.clone())),
                None => Ok(()),
            },
            Err(_) => Err(RepositoryError::Cache("failure flag poisoned".to_string())),
        }
    }

    /// Check if a live entry exists (without updating access time)
    pub async fn contains_key(&self, key: &str) -> bool {
        let store = self.store.read().await;
        store
            .entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    /// Clear all entries from the cache
    pub async fn clear(&self) -> Result<()> {
        self.check_failure()?;
        let mut store = self.store.write().await;

        let count = store.entries.len();
        store.entries.clear();
        store.lru_queue.clear();
        store.current_size_bytes = 0;
        store.stats.entries = 0;
        store.stats.invalidations += count as u64;

        info!("Cleared {} entries from cache", count);
        Ok(())
    }

    /// Remove all expired entries, returning how many were dropped
    pub async fn cleanup_expired(&self) -> Result<usize> {
        self.check_failure()?;
        let mut store = self.store.write().await;

        let expired_keys: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            Self::remove_entry(&mut store, key);
        }

        if !expired_keys.is_empty() {
            store.stats.evictions_ttl += expired_keys.len() as u64;
            debug!("Cleaned up {} expired entries", expired_keys.len());
        }

        Ok(expired_keys.len())
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let store = self.store.read().await;
        store.stats.clone()
    }

    /// Get current cache size in bytes
    pub async fn size_bytes(&self) -> usize {
        let store = self.store.read().await;
        store.current_size_bytes
    }

    /// Get number of entries in cache, expired ones included until swept
    pub async fn len(&self) -> usize {
        let store = self.store.read().await;
        store.entries.len()
    }

    /// Check if cache is empty
    pub async fn is_empty(&self) -> bool {
        let store = self.store.read().await;
        store.entries.is_empty()
    }

    fn remove_entry(store: &mut CacheStore, key: &str) -> bool {
        if let Some(entry) = store.entries.remove(key) {
            store.lru_queue.retain(|k| k != key);
            store.current_size_bytes = store
                .current_size_bytes
                .saturating_sub(entry.metadata.size_bytes);
            store.stats.entries = store.stats.entries.saturating_sub(1);
            true
        } else {
            false
        }
    }

    /// Evict entries until a new entry of `needed_size` fits
    fn evict_if_needed(&self, store: &mut CacheStore, needed_size: usize) -> Result<()> {
        while store.entries.len() >= self.config.max_entries {
            if let Some(key) = store.lru_queue.pop_front() {
                debug!("Evicting entry due to max_entries limit: {}", key);
                Self::remove_entry(store, &key);
                store.stats.evictions_size += 1;
            } else {
                break;
            }
        }

        while store.current_size_bytes + needed_size > self.config.max_size_bytes {
            if let Some(key) = store.lru_queue.pop_front() {
                debug!("Evicting entry due to size limit: {}", key);
                Self::remove_entry(store, &key);
                store.stats.evictions_size += 1;
            } else {
                warn!("Cannot evict more entries, cache size limit exceeded");
                return Err(RepositoryError::Cache(
                    "Cache size limit exceeded".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn update_stats(&self, store: &mut CacheStore) {
        if self.config.enable_metrics {
            store.stats.size_bytes = store.current_size_bytes;
            store.stats.entries = store.entries.len();

            if !store.entries.is_empty() {
                store.stats.avg_entry_size = store.current_size_bytes / store.entries.len();
            }
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[async_trait]
impl CacheClient for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        self.check_failure()?;
        let mut guard = self.store.write().await;
        let store = &mut *guard;

        let expired = match store.entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.mark_accessed();
                let value = entry.value.clone();
                store.stats.hits += 1;

                if self.config.enable_lru_eviction {
                    store.lru_queue.retain(|k| k != key);
                    store.lru_queue.push_back(key.to_string());
                }

                debug!("Cache hit: {}", key);
                return Ok(Some(value));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            debug!("Cache entry expired: {}", key);
            store.stats.evictions_ttl += 1;
            Self::remove_entry(store, key);
        } else {
            debug!("Cache miss: {}", key);
        }
        store.stats.misses += 1;
        Ok(None)
    }

    async fn set(&self, key: &str, value: CacheValue, expires_at: DateTime<Utc>) -> Result<()> {
        self.check_failure()?;
        let entry = CacheEntry::new(key.to_string(), value, expires_at);
        let size = entry.metadata.size_bytes;

        let mut store = self.store.write().await;

        // Replacing an entry frees its slot before eviction is considered
        if Self::remove_entry(&mut store, key) {
            debug!("Updating existing cache entry: {}", key);
        } else {
            debug!("Inserting new cache entry: {}", key);
        }

        self.evict_if_needed(&mut store, size)?;

        store.entries.insert(key.to_string(), entry);
        store.lru_queue.push_back(key.to_string());
        store.current_size_bytes += size;
        store.stats.entries += 1;

        self.update_stats(&mut store);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        self.check_failure()?;
        let mut store = self.store.write().await;

        let removed = Self::remove_entry(&mut store, key);
        if removed {
            store.stats.invalidations += 1;
            debug!("Removed cache entry: {}", key);
        }
        self.update_stats(&mut store);
        Ok(removed)
    }

    async fn remove_by_prefix(&self, prefix: &str) -> Result<usize> {
        self.check_failure()?;
        let mut store = self.store.write().await;

        let keys: Vec<CacheKey> = store
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();

        for key in &keys {
            Self::remove_entry(&mut store, key);
        }

        store.stats.invalidations += keys.len() as u64;
        self.update_stats(&mut store);
        info!("Invalidated {} entries with prefix: {}", keys.len(), prefix);

        Ok(keys.len())
    }
}

/// Background task sweeping expired entries every `cleanup_interval`
pub async fn start_auto_cleanup(cache: Arc<InMemoryCache>) {
    let interval = cache.config.cleanup_interval;

    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        match cache.cleanup_expired().await {
            Ok(0) => {}
            Ok(count) => debug!("Auto cleanup removed {} entries", count),
            Err(e) => warn!("Auto cleanup failed: {}", e),
        }
    }
}

//! Query, read and write options

use crate::backend::{Filter, SortField};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options of a find-class operation
///
/// Setting a cache key turns on caching for the call; [`use_cache`]
/// can turn it back off without losing the key.
///
/// [`use_cache`]: FindOptions::use_cache
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub query: Option<Filter>,
    /// Filter applied by the system (tenant scope and the like)
    pub system_filter: Option<Filter>,
    /// Filter supplied by the end user
    pub user_filter: Option<Filter>,
    /// Projection; `None` returns whole documents
    pub fields: Option<Vec<String>>,
    pub sort: Vec<SortField>,
    /// Page size; `None` returns every match and never reports more
    pub limit: Option<usize>,
    pub skip: usize,
    /// Physical indices to search instead of the type's defaults
    pub indices: Option<Vec<String>>,
    /// `(field, start, end)` restricting a date field, and the partitions
    /// searched for time-partitioned types
    pub date_range: Option<(String, DateTime<Utc>, DateTime<Utc>)>,
    pub cache_key: Option<String>,
    pub use_cache: bool,
    pub cache_ttl: Option<Duration>,
    /// Return soft-deleted documents too
    pub include_soft_deleted: bool,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, filter: Filter) -> Self {
        self.query = Some(filter);
        self
    }

    pub fn system_filter(mut self, filter: Filter) -> Self {
        self.system_filter = Some(filter);
        self
    }

    /// Add `filter` to the system filter, keeping any already set
    pub fn and_system_filter(mut self, filter: Filter) -> Self {
        self.system_filter = Some(match self.system_filter.take() {
            Some(existing) => Filter::And(vec![existing, filter]),
            None => filter,
        });
        self
    }

    pub fn user_filter(mut self, filter: Filter) -> Self {
        self.user_filter = Some(filter);
        self
    }

    pub fn fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn sort(mut self, sort: SortField) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// One-based page of `limit` documents
    pub fn page(self, page: usize, limit: usize) -> Self {
        self.limit(limit).skip(page.saturating_sub(1) * limit)
    }

    pub fn indices<S: Into<String>>(mut self, indices: impl IntoIterator<Item = S>) -> Self {
        self.indices = Some(indices.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_date_range(
        mut self,
        field: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        self.date_range = Some((field.into(), start, end));
        self
    }

    /// Cache the result under `key` (scoped per document type)
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self.use_cache = true;
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn include_soft_deleted(mut self, include: bool) -> Self {
        self.include_soft_deleted = include;
        self
    }

    /// Cache key of this call when caching is requested
    pub fn effective_cache_key(&self) -> Option<&str> {
        if self.use_cache {
            self.cache_key.as_deref().filter(|key| !key.is_empty())
        } else {
            None
        }
    }

    /// Whether a result with `total` matches has documents past this page
    pub fn has_more(&self, total: u64) -> bool {
        match self.limit {
            Some(limit) => total > (self.skip + limit) as u64,
            None => false,
        }
    }
}

/// Caching behavior of id lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    pub use_cache: bool,
    /// Expiration of entries written by this call; `None` uses the default
    pub ttl: Option<Duration>,
}

impl GetOptions {
    pub fn cached() -> Self {
        Self {
            use_cache: true,
            ttl: None,
        }
    }

    pub fn uncached() -> Self {
        Self {
            use_cache: false,
            ttl: None,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

impl Default for GetOptions {
    fn default() -> Self {
        Self::cached()
    }
}

/// Behavior of add, save and remove
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Write the persisted documents into the cache; ignored by removes
    pub add_to_cache: bool,
    /// Publish change events for this mutation
    pub send_notifications: bool,
}

impl SaveOptions {
    pub fn add_to_cache(mut self, add: bool) -> Self {
        self.add_to_cache = add;
        self
    }

    pub fn send_notifications(mut self, send: bool) -> Self {
        self.send_notifications = send;
        self
    }
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            add_to_cache: false,
            send_notifications: true,
        }
    }
}

/// A page of documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindResults<T> {
    pub documents: Vec<T>,
    /// Total matches regardless of paging
    pub total: u64,
    pub has_more: bool,
}

impl<T> FindResults<T> {
    pub fn empty() -> Self {
        Self {
            documents: Vec::new(),
            total: 0,
            has_more: false,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl<T> Default for FindResults<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> IntoIterator for FindResults<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}

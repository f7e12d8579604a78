//! Search backend port
//!
//! The repositories never speak a wire protocol. They hand a
//! [`SearchBackend`] fully resolved index names and a [`SearchQuery`], and
//! get raw JSON documents back. Find-class calls report the backend's
//! status so the caller decides what counts as failure; point lookups
//! report absence as `None`.

pub mod memory;
pub mod query;

pub use memory::{BackendCalls, InMemoryBackend};
pub use query::{Filter, ScriptOp, SearchQuery, SortField, SortOrder, UpdateScript};

use crate::error::{RepositoryError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status reported by the backend for find-class calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub code: u16,
    pub message: Option<String>,
}

impl BackendStatus {
    pub fn ok() -> Self {
        Self {
            code: 200,
            message: None,
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Convert a non-successful status into [`RepositoryError::BackendQuery`]
    pub fn into_result(self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(RepositoryError::BackendQuery {
                status: self.code,
                message: self
                    .message
                    .unwrap_or_else(|| "no error message".to_string()),
            })
        }
    }
}

/// A fully resolved search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Physical index names; a trailing `*` is a wildcard
    pub indices: Vec<String>,
    pub query: SearchQuery,
    /// Top-level fields to return; `None` returns whole documents
    pub fields: Option<Vec<String>>,
    pub sort: Vec<SortField>,
    pub skip: usize,
    /// `None` returns every match
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub status: BackendStatus,
    /// Matching documents in sort order, after paging
    pub documents: Vec<Value>,
    /// Total matches before paging
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountResponse {
    pub status: BackendStatus,
    pub count: u64,
}

/// One term bucket of an aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermBucket {
    pub key: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResponse {
    pub status: BackendStatus,
    /// Buckets ordered by descending count
    pub buckets: Vec<TermBucket>,
}

/// Result of a conditional update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    NotFound,
    /// Every attempt lost to a concurrent writer
    ConflictExhausted { attempts: u32 },
}

/// Search/index backend consumed by the repositories
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse>;

    /// Fetch one document from a concrete index
    async fn point_get(&self, index: &str, id: &str) -> Result<Option<Value>>;

    /// Fetch many `(index, id)` pairs in one round trip, returning the
    /// documents that were found
    async fn multi_get(&self, targets: &[(String, String)]) -> Result<Vec<Value>>;

    /// Apply `script` atomically, retrying up to `max_retries` times when a
    /// concurrent write wins
    async fn conditional_update(
        &self,
        index: &str,
        id: &str,
        script: &UpdateScript,
        max_retries: u32,
    ) -> Result<UpdateOutcome>;

    async fn count(&self, indices: &[String], query: &SearchQuery) -> Result<CountResponse>;

    async fn aggregate(
        &self,
        indices: &[String],
        query: &SearchQuery,
        field: &str,
        bucket_limit: usize,
    ) -> Result<AggregationResponse>;

    /// Upsert `(index, document)` pairs; documents carry their own id
    async fn index_documents(&self, documents: &[(String, Value)]) -> Result<()>;

    async fn delete_documents(&self, targets: &[(String, String)]) -> Result<()>;

    /// Delete every match, returning how many were deleted
    async fn delete_by_query(&self, indices: &[String], query: &SearchQuery) -> Result<u64>;
}

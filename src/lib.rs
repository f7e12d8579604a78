//! # Stack Repository (stack-repository)
//!
//! A cache-augmented document repository over a search backend, with
//! time-sharded indices and atomic occurrence counters for error stacks.
//!
//! ## Features
//!
//! - Cache-first id lookups with shard-aware fallbacks
//! - Optional result caching for find, find-one and count calls
//! - Validators, observers and secondary cache keys hooked into every mutation
//! - Month-partitioned indices resolved from the id's creation time
//! - Conflict-retried counter updates that never lose an increment
//! - Fire-and-forget change events, optionally delayed
//!
//! ## Reading Documents
//!
//! Id lookups go to the cache first and fill it on a miss.
//!
//! ```no_run
//! use std::sync::Arc;
//! use stack_repository::{
//!     GetOptions, InMemoryBackend, InMemoryCache, RepositoryConfig, EventRepository,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let events = EventRepository::new(
//!         Arc::new(InMemoryBackend::new()),
//!         Arc::new(InMemoryCache::default()),
//!         Arc::new(RepositoryConfig::from_env()?),
//!     );
//!
//!     let event = events
//!         .get_by_id("5e1e56000000000000000001", GetOptions::cached())
//!         .await?;
//!     println!("Found: {:?}", event);
//!     Ok(())
//! }
//! ```
//!
//! ## Stack Counters
//!
//! Occurrences are folded into a stack with one atomic update, and a
//! delayed `Saved` event goes out once it lands.
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::Utc;
//! use stack_repository::{
//!     EventRepository, InMemoryBackend, InMemoryCache, InMemoryMessageBus,
//!     OccurrenceIncrement, OutboundQueue, RepositoryConfig, SaveOptions, Stack,
//!     StackRepository,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = Arc::new(InMemoryBackend::new());
//!     let cache = Arc::new(InMemoryCache::default());
//!     let config = Arc::new(RepositoryConfig::default());
//!     let (queue, _drain) = OutboundQueue::spawn(Arc::new(InMemoryMessageBus::new()));
//!
//!     let events = Arc::new(EventRepository::new(backend.clone(), cache.clone(), config.clone()));
//!     let stacks = StackRepository::new(backend, cache, config, events, queue);
//!
//!     let stack = stacks
//!         .add(Stack::new("org", "proj", "abc123", "NullReferenceException"), SaveOptions::default())
//!         .await?;
//!
//!     let now = Utc::now();
//!     stacks
//!         .increment_counters(OccurrenceIncrement::new(stack.id.clone(), now, now, 5))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod connection;
pub mod document;
pub mod error;
pub mod id;
pub mod logging;
pub mod messaging;
pub mod repository;
pub mod schema;
pub mod shard;

// Re-export main types for convenience
pub use backend::{
    AggregationResponse, BackendStatus, CountResponse, Filter, InMemoryBackend, SearchBackend,
    SearchQuery, SearchRequest, SearchResponse, SortField, SortOrder, TermBucket, UpdateOutcome,
    UpdateScript,
};
pub use cache::{CacheClient, CacheConfig, CacheConfigBuilder, CacheStats, InMemoryCache};
pub use config::{RepositoryConfig, RepositoryConfigBuilder};
pub use connection::ConnectionMapping;
pub use document::{Document, EntityDescriptor, IndexLayout, ScopeKind};
pub use error::{RepositoryError, Result};
pub use id::ObjectId;
pub use messaging::{
    ChangePublisher, ChangeType, EntityChanged, InMemoryMessageBus, MessagePublisher,
    OutboundQueue,
};
pub use repository::{
    ChangeKind, ChangeObserver, ChangeSet, ChangeValidator, FindOptions, FindResults,
    GetOptions, ReadRepository, Repository, SaveOptions, SecondaryCacheKeys,
};
pub use schema::{
    EventRepository, OccurrenceIncrement, PersistentEvent, Stack, StackRepository,
};
pub use shard::ShardResolver;

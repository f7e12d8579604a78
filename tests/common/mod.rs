//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use stack_repository::{
    EventRepository, InMemoryBackend, InMemoryCache, InMemoryMessageBus, OutboundQueue,
    PersistentEvent, RepositoryConfig, StackRepository,
};
use std::sync::Arc;
use std::time::Duration;

pub const ORG: &str = "537650f3b77efe23a47914f3";
pub const PROJECT: &str = "537650f3b77efe23a47914f4";

/// Repositories wired to in-memory ports, with handles to inspect them
pub struct Harness {
    pub backend: Arc<InMemoryBackend>,
    pub cache: Arc<InMemoryCache>,
    pub bus: Arc<InMemoryMessageBus>,
    pub config: Arc<RepositoryConfig>,
    pub queue: OutboundQueue,
    pub events: Arc<EventRepository>,
    pub stacks: StackRepository,
}

/// Configuration without TTL jitter and with a short notification delay
pub fn test_config() -> RepositoryConfig {
    RepositoryConfig::builder()
        .cache_ttl_jitter(0.0)
        .increment_notification_delay(Duration::from_millis(100))
        .build()
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: RepositoryConfig) -> Harness {
    let backend = Arc::new(InMemoryBackend::new());
    let cache = Arc::new(InMemoryCache::default());
    let bus = Arc::new(InMemoryMessageBus::new());
    let config = Arc::new(config);
    let (queue, _drain) = OutboundQueue::spawn(bus.clone());

    let events = Arc::new(EventRepository::new(
        backend.clone(),
        cache.clone(),
        config.clone(),
    ));
    let stacks = StackRepository::new(
        backend.clone(),
        cache.clone(),
        config.clone(),
        events.clone(),
        queue.clone(),
    );

    Harness {
        backend,
        cache,
        bus,
        config,
        queue,
        events,
        stacks,
    }
}

pub fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0)
        .single()
        .expect("valid test date")
}

pub fn event_at(stack_id: &str, when: DateTime<Utc>) -> PersistentEvent {
    PersistentEvent::new(ORG, PROJECT, stack_id, "error", when)
}

/// Give the outbound queue time to drain
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

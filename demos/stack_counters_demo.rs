//! Demonstrates the stack repository over in-memory ports
//!
//! This example shows how to:
//! - Create stacks and events
//! - Fold concurrent occurrences into a stack's counters
//! - Look stacks up by signature through the cache
//! - Route change events to listening connections

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use stack_repository::{
    cache::start_auto_cleanup, logging, ConnectionMapping, EventRepository, FindOptions,
    GetOptions, InMemoryBackend, InMemoryCache, InMemoryMessageBus, OccurrenceIncrement,
    OutboundQueue, PersistentEvent, RepositoryConfig, SaveOptions, Stack, StackRepository,
};
use std::sync::Arc;

const ORG: &str = "537650f3b77efe23a47914f3";
const PROJECT: &str = "537650f3b77efe23a47914f4";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = Arc::new(RepositoryConfig::from_env()?);
    let backend = Arc::new(InMemoryBackend::new());
    let cache = Arc::new(InMemoryCache::default());
    tokio::spawn(start_auto_cleanup(cache.clone()));
    let bus = Arc::new(InMemoryMessageBus::new());
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
        queue,
    );

    let connections = ConnectionMapping::new();
    connections.add(PROJECT, "dashboard-1").await;

    // 1. Create a stack and a few events
    println!("1. Creating stack and events...");
    let stack = stacks
        .add(
            Stack::new(ORG, PROJECT, "5f4dcc3b5aa765d6", "NullReferenceException"),
            SaveOptions::default(),
        )
        .await?;
    println!("   Created stack: {} - {}", stack.id, stack.title);

    let now = Utc::now();
    let occurrences: Vec<PersistentEvent> = (0..12)
        .map(|i| {
            PersistentEvent::new(ORG, PROJECT, &stack.id, "error", now + ChronoDuration::minutes(i))
                .with_message("Object reference not set to an instance of an object")
        })
        .collect();
    let added = events.add_many(occurrences, SaveOptions::default()).await?;
    println!("   Stored {} events in {:?}\n", added.len(), backend.index_names().await);

    // 2. Two ingestion workers report their batches at once
    println!("2. Incrementing counters concurrently...");
    let batches = [(0, 4, 5), (5, 11, 7)];
    let results = join_all(batches.iter().map(|(first, last, count)| {
        stacks.increment_counters(
            OccurrenceIncrement::new(
                stack.id.clone(),
                now + ChronoDuration::minutes(*first),
                now + ChronoDuration::minutes(*last),
                *count,
            )
            .scoped(ORG, PROJECT),
        )
    }))
    .await;
    for result in results {
        println!("   Applied: {}", result?);
    }

    let counted = stacks
        .get_by_id(&stack.id, GetOptions::cached())
        .await?
        .ok_or_else(|| anyhow::anyhow!("stack {} disappeared", stack.id))?;
    println!(
        "   Total {} between {} and {}\n",
        counted.total_occurrences, counted.first_occurrence, counted.last_occurrence
    );

    // 3. Signature lookups are served from the cache after the first call
    println!("3. Looking up by signature...");
    for _ in 0..3 {
        stacks.get_by_signature(PROJECT, &stack.signature_hash).await?;
    }
    println!("   Backend calls: {:?}", backend.calls());
    println!("   Cache: {}\n", cache.stats().await);

    // 4. A stack with events cannot be removed
    println!("4. Removing a referenced stack...");
    match stacks.remove(counted.clone(), SaveOptions::default()).await {
        Ok(()) => println!("   Removed (unexpected)"),
        Err(e) => println!("   Refused: {}", e),
    }

    let regressed = stacks.mark_as_regressed(&stack.id).await?;
    println!(
        "   Marked regressed: {}\n",
        regressed.map(|s| s.is_regressed).unwrap_or(false)
    );

    // 5. Change events reach the connections listening on the project
    println!("5. Delivering change events...");
    let delivered = bus.wait_for(3, config.increment_notification_delay * 2).await;
    for message in &delivered {
        let recipients = connections.recipients(message).await;
        println!(
            "   {:?} {} {} -> {:?}",
            message.change_type, message.entity_type, message.entity_id, recipients
        );
    }

    let page = events
        .get_by_stack_id(&stack.id, FindOptions::new().limit(5))
        .await?;
    println!("\n   Latest {} of {} events", page.len(), page.total);
    Ok(())
}

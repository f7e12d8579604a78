//! Integration tests for stack lookups, counters and the referential guard

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{date, event_at, harness, harness_with, settle, test_config, Harness, ORG, PROJECT};
use futures::future::join_all;
use stack_repository::schema::signature_cache_key;
use stack_repository::{
    ChangeType, FindOptions, GetOptions, OccurrenceIncrement, RepositoryConfig, RepositoryError,
    SaveOptions, SortField, Stack,
};
use std::time::Duration;

async fn add_stack(h: &Harness, signature: &str) -> Stack {
    h.stacks
        .add(
            Stack::new(ORG, PROJECT, signature, format!("Stack {}", signature)),
            SaveOptions::default().send_notifications(false),
        )
        .await
        .unwrap()
}

fn signature_entry(h: &Harness, signature: &str) -> String {
    format!(
        "Stack-{}",
        signature_cache_key(PROJECT, signature, h.config.stacking_version)
    )
}

#[tokio::test]
async fn test_concurrent_increments_are_not_lost() {
    let h = harness();
    let stack = add_stack(&h, "abc").await;

    // Occurrences after the stack was created, so both bounds move
    let base = Utc::now() + ChronoDuration::days(1);
    let increments = vec![
        OccurrenceIncrement::new(
            stack.id.clone(),
            base + ChronoDuration::hours(2),
            base + ChronoDuration::hours(5),
            5,
        ),
        OccurrenceIncrement::new(
            stack.id.clone(),
            base + ChronoDuration::hours(1),
            base + ChronoDuration::hours(3),
            7,
        ),
    ];

    let results = join_all(
        increments
            .into_iter()
            .map(|increment| h.stacks.increment_counters(increment.send_notifications(false))),
    )
    .await;
    assert!(results.into_iter().all(|result| result.unwrap()));

    let stored = h
        .stacks
        .get_by_id(&stack.id, GetOptions::uncached())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.total_occurrences, 12);
    assert_eq!(stored.first_occurrence, base + ChronoDuration::hours(1));
    assert_eq!(stored.last_occurrence, base + ChronoDuration::hours(5));
}

#[tokio::test]
async fn test_first_increment_resets_first_occurrence() {
    let h = harness();
    let stack = add_stack(&h, "abc").await;

    // A fresh stack's first occurrence is its creation time; the first
    // real occurrence replaces it even when later
    let later = stack.first_occurrence + ChronoDuration::hours(1);
    assert!(h
        .stacks
        .increment_counters(OccurrenceIncrement::new(stack.id.clone(), later, later, 1))
        .await
        .unwrap());

    let stored = h
        .stacks
        .get_by_id(&stack.id, GetOptions::uncached())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.first_occurrence, later);

    // Once counted, only earlier occurrences move it
    let even_later = later + ChronoDuration::hours(1);
    h.stacks
        .increment_counters(OccurrenceIncrement::new(stack.id.clone(), even_later, even_later, 1))
        .await
        .unwrap();
    let stored = h
        .stacks
        .get_by_id(&stack.id, GetOptions::uncached())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.first_occurrence, later);
    assert_eq!(stored.last_occurrence, even_later);
    assert_eq!(stored.total_occurrences, 2);
}

#[tokio::test]
async fn test_increment_invalidates_primary_entry() {
    let h = harness();
    let stack = add_stack(&h, "abc").await;
    h.stacks.get_by_id(&stack.id, GetOptions::cached()).await.unwrap();

    let now = Utc::now();
    h.stacks
        .increment_counters(OccurrenceIncrement::new(stack.id.clone(), now, now, 3))
        .await
        .unwrap();

    let cached = h
        .stacks
        .get_by_id(&stack.id, GetOptions::cached())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.total_occurrences, 3);
}

#[tokio::test]
async fn test_counter_updates_invalidate_signature_entry() {
    let h = harness();
    let stack = add_stack(&h, "abc").await;
    h.stacks.get_by_signature(PROJECT, "abc").await.unwrap();
    assert!(h.cache.contains_key(&signature_entry(&h, "abc")).await);

    let now = Utc::now();
    assert!(h
        .stacks
        .increment_counters(OccurrenceIncrement::new(stack.id.clone(), now, now, 5).send_notifications(false))
        .await
        .unwrap());

    assert!(!h.cache.contains_key(&signature_entry(&h, "abc")).await);
    let by_signature = h.stacks.get_by_signature(PROJECT, "abc").await.unwrap().unwrap();
    assert_eq!(by_signature.total_occurrences, 5);

    assert!(h.stacks.reset_counters(&stack.id).await.unwrap());
    assert!(!h.cache.contains_key(&signature_entry(&h, "abc")).await);
    let by_signature = h.stacks.get_by_signature(PROJECT, "abc").await.unwrap().unwrap();
    assert_eq!(by_signature.total_occurrences, 0);
}

#[tokio::test]
async fn test_soft_deleted_stack_not_cached_under_signature() {
    let h = harness();
    let mut stack = add_stack(&h, "abc").await;

    stack.is_deleted = true;
    h.stacks
        .save(stack.clone(), SaveOptions::default().add_to_cache(true).send_notifications(false))
        .await
        .unwrap();

    assert!(!h.cache.contains_key(&signature_entry(&h, "abc")).await);
    assert!(h.stacks.get_by_signature(PROJECT, "abc").await.unwrap().is_none());

    h.cache.clear().await.unwrap();
    assert!(h.stacks.get_by_signature(PROJECT, "abc").await.unwrap().is_none());

    // The id entry is still primed
    h.stacks.save(stack.clone(), SaveOptions::default().add_to_cache(true).send_notifications(false))
        .await
        .unwrap();
    h.backend.reset_calls();
    let direct = h.stacks.get_by_id(&stack.id, GetOptions::cached()).await.unwrap();
    assert!(direct.unwrap().is_deleted);
    assert_eq!(h.backend.calls().reads(), 0);
}

#[tokio::test]
async fn test_conflict_exhaustion_returns_false() {
    let h = harness();
    let stack = add_stack(&h, "abc").await;
    let now = Utc::now();

    // Default budget is three retries after the first attempt
    h.backend.inject_conflicts(&stack.id, 4);
    let applied = h
        .stacks
        .increment_counters(OccurrenceIncrement::new(stack.id.clone(), now, now, 1))
        .await
        .unwrap();
    assert!(!applied);

    let stored = h
        .stacks
        .get_by_id(&stack.id, GetOptions::uncached())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.total_occurrences, 0);

    settle().await;
    assert!(h.bus.delivered().is_empty());
}

#[tokio::test]
async fn test_conflicts_within_budget_are_retried() {
    let h = harness();
    let stack = add_stack(&h, "abc").await;
    let now = Utc::now();

    h.backend.inject_conflicts(&stack.id, 3);
    assert!(h
        .stacks
        .increment_counters(OccurrenceIncrement::new(stack.id.clone(), now, now, 2))
        .await
        .unwrap());

    let stored = h
        .stacks
        .get_by_id(&stack.id, GetOptions::uncached())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.total_occurrences, 2);
}

#[tokio::test]
async fn test_increment_missing_stack_returns_false() {
    let h = harness();
    let now = Utc::now();

    let applied = h
        .stacks
        .increment_counters(OccurrenceIncrement::new("missing", now, now, 1))
        .await
        .unwrap();
    assert!(!applied);
}

#[tokio::test]
async fn test_invalid_increment_is_misuse_without_io() {
    let h = harness();
    let now = Utc::now();
    let earlier = now - ChronoDuration::minutes(1);

    for increment in [
        OccurrenceIncrement::new("", earlier, now, 1),
        OccurrenceIncrement::new("s1", now, earlier, 1),
        OccurrenceIncrement::new("s1", earlier, now, 0),
    ] {
        let err = h.stacks.increment_counters(increment).await.unwrap_err();
        assert!(err.is_misuse(), "unexpected error: {err}");
    }
    assert_eq!(h.backend.calls().update, 0);
}

#[tokio::test]
async fn test_increment_notification_is_delayed() {
    let config = RepositoryConfig::builder()
        .cache_ttl_jitter(0.0)
        .increment_notification_delay(Duration::from_millis(300))
        .build();
    let h = harness_with(config);
    let stack = add_stack(&h, "abc").await;
    let now = Utc::now();

    h.stacks
        .increment_counters(OccurrenceIncrement::new(stack.id.clone(), now, now, 1).scoped(ORG, PROJECT))
        .await
        .unwrap();

    settle().await;
    assert!(h.bus.delivered().is_empty());

    let delivered = h.bus.wait_for(1, Duration::from_secs(2)).await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].change_type, ChangeType::Saved);
    assert_eq!(delivered[0].entity_id, stack.id);
    assert_eq!(delivered[0].entity_type, "Stack");
    assert_eq!(delivered[0].project_id.as_deref(), Some(PROJECT));
}

#[tokio::test]
async fn test_get_by_signature_is_cached() {
    let h = harness();
    let stack = add_stack(&h, "abc").await;
    add_stack(&h, "def").await;
    h.backend.reset_calls();

    let first = h.stacks.get_by_signature(PROJECT, "abc").await.unwrap();
    let second = h.stacks.get_by_signature(PROJECT, "abc").await.unwrap();

    assert_eq!(first.as_ref().map(|s| s.id.as_str()), Some(stack.id.as_str()));
    assert_eq!(second, first);
    assert_eq!(h.backend.calls().search, 1);
    assert!(h.cache.contains_key(&signature_entry(&h, "abc")).await);

    assert!(h.stacks.get_by_signature(PROJECT, "zzz").await.unwrap().is_none());
    assert!(h.stacks.get_by_signature("", "abc").await.unwrap().is_none());
}

#[tokio::test]
async fn test_save_invalidates_signature_entry() {
    let h = harness();
    let mut stack = add_stack(&h, "abc").await;
    h.stacks.get_by_signature(PROJECT, "abc").await.unwrap();
    assert!(h.cache.contains_key(&signature_entry(&h, "abc")).await);

    stack.title = "Renamed".to_string();
    h.stacks.save(stack, SaveOptions::default()).await.unwrap();

    assert!(!h.cache.contains_key(&signature_entry(&h, "abc")).await);
    let reloaded = h.stacks.get_by_signature(PROJECT, "abc").await.unwrap().unwrap();
    assert_eq!(reloaded.title, "Renamed");
}

#[tokio::test]
async fn test_signature_change_invalidates_old_entry() {
    let h = harness();
    let mut stack = add_stack(&h, "abc").await;
    h.stacks.get_by_signature(PROJECT, "abc").await.unwrap();

    stack.signature_hash = "xyz".to_string();
    h.stacks.save(stack.clone(), SaveOptions::default()).await.unwrap();

    assert!(!h.cache.contains_key(&signature_entry(&h, "abc")).await);
    assert!(h.stacks.get_by_signature(PROJECT, "abc").await.unwrap().is_none());
    assert_eq!(
        h.stacks.get_by_signature(PROJECT, "xyz").await.unwrap().map(|s| s.id),
        Some(stack.id)
    );
}

#[tokio::test]
async fn test_signature_key_includes_stacking_version() {
    let config = RepositoryConfig::builder()
        .cache_ttl_jitter(0.0)
        .stacking_version(7)
        .build();
    let h = harness_with(config);
    add_stack(&h, "abc").await;

    h.stacks.get_by_signature(PROJECT, "abc").await.unwrap();
    let key = format!("Stack-{}-abc-7", PROJECT);
    assert!(h.cache.contains_key(&key).await);
}

#[tokio::test]
async fn test_referenced_stack_cannot_be_removed() {
    let h = harness();
    let stack = add_stack(&h, "abc").await;
    h.events
        .add(event_at(&stack.id, date(2020, 1, 1)), SaveOptions::default())
        .await
        .unwrap();
    h.stacks.get_by_id(&stack.id, GetOptions::cached()).await.unwrap();
    h.backend.reset_calls();

    let err = h
        .stacks
        .remove(stack.clone(), SaveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::IntegrityViolation(_)));

    // Nothing was deleted or invalidated
    assert_eq!(h.backend.calls().delete, 0);
    assert!(h.backend.document("stacks-v1", &stack.id).await.is_some());
    assert!(h.cache.contains_key(&format!("Stack-{}", stack.id)).await);

    settle().await;
    assert!(h.bus.delivered().is_empty());
}

#[tokio::test]
async fn test_unreferenced_stack_is_removed() {
    let h = harness();
    let stack = add_stack(&h, "abc").await;
    h.stacks.get_by_id(&stack.id, GetOptions::cached()).await.unwrap();
    h.stacks.get_by_signature(PROJECT, "abc").await.unwrap();

    h.stacks.remove(stack.clone(), SaveOptions::default()).await.unwrap();

    assert!(h.backend.document("stacks-v1", &stack.id).await.is_none());
    assert!(!h.cache.contains_key(&format!("Stack-{}", stack.id)).await);
    assert!(!h.cache.contains_key(&signature_entry(&h, "abc")).await);

    let delivered = h.bus.wait_for(1, Duration::from_secs(1)).await;
    assert_eq!(delivered[0].change_type, ChangeType::Removed);
    assert_eq!(delivered[0].entity_id, stack.id);
}

#[tokio::test]
async fn test_mark_as_regressed_writes_through_cache() {
    let h = harness();
    let mut stack = add_stack(&h, "abc").await;
    stack.date_fixed = Some(date(2020, 1, 1));
    h.stacks
        .save(stack.clone(), SaveOptions::default().send_notifications(false))
        .await
        .unwrap();

    let regressed = h.stacks.mark_as_regressed(&stack.id).await.unwrap().unwrap();
    assert!(regressed.is_regressed);
    assert!(!regressed.is_fixed());

    h.backend.reset_calls();
    let cached = h
        .stacks
        .get_by_id(&stack.id, GetOptions::cached())
        .await
        .unwrap()
        .unwrap();
    let by_signature = h.stacks.get_by_signature(PROJECT, "abc").await.unwrap().unwrap();
    assert_eq!(h.backend.calls().reads(), 0);
    assert!(cached.is_regressed);
    assert!(by_signature.is_regressed);

    let delivered = h.bus.wait_for(1, Duration::from_secs(1)).await;
    assert_eq!(delivered[0].change_type, ChangeType::Saved);

    assert!(h.stacks.mark_as_regressed("missing").await.unwrap().is_none());
    assert!(h.stacks.mark_as_regressed("").await.unwrap_err().is_misuse());
}

#[tokio::test]
async fn test_reset_counters() {
    let h = harness();
    let stack = add_stack(&h, "abc").await;
    let now = Utc::now();
    h.stacks
        .increment_counters(OccurrenceIncrement::new(stack.id.clone(), now, now, 9).send_notifications(false))
        .await
        .unwrap();

    assert!(h.stacks.reset_counters(&stack.id).await.unwrap());
    let stored = h
        .stacks
        .get_by_id(&stack.id, GetOptions::uncached())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.total_occurrences, 0);

    assert!(!h.stacks.reset_counters("missing").await.unwrap());
}

#[tokio::test]
async fn test_get_by_project_sorts_by_last_occurrence() {
    let h = harness_with(test_config());
    let now = Utc::now();
    for (signature, day) in [("a", 3), ("b", 9), ("c", 5)] {
        let stack = add_stack(&h, signature).await;
        let when = now + ChronoDuration::days(day);
        h.stacks
            .increment_counters(
                OccurrenceIncrement::new(stack.id.clone(), when, when, 1).send_notifications(false),
            )
            .await
            .unwrap();
    }
    let other = h
        .stacks
        .add(Stack::new(ORG, "other-project", "d", "other"), SaveOptions::default())
        .await
        .unwrap();

    let results = h
        .stacks
        .get_by_project(PROJECT, FindOptions::new())
        .await
        .unwrap();
    let order: Vec<&str> = results.documents.iter().map(|s| s.signature_hash.as_str()).collect();
    assert_eq!(order, vec!["b", "c", "a"]);
    assert!(!results.documents.iter().any(|s| s.id == other.id));

    let oldest_first = h
        .stacks
        .get_by_project(
            PROJECT,
            FindOptions::new().sort(SortField::asc(stack_repository::schema::stack_fields::LAST_OCCURRENCE)),
        )
        .await
        .unwrap();
    assert_eq!(oldest_first.documents[0].signature_hash, "a");
}

#[tokio::test]
async fn test_events_by_stack_newest_first() {
    let h = harness();
    for day in [2, 9, 5] {
        h.events
            .add(event_at("s1", date(2020, 3, day)), SaveOptions::default())
            .await
            .unwrap();
    }
    h.events
        .add(event_at("s2", date(2020, 3, 1)), SaveOptions::default())
        .await
        .unwrap();

    let results = h
        .events
        .get_by_stack_id("s1", FindOptions::new().limit(2))
        .await
        .unwrap();
    assert_eq!(results.total, 3);
    assert!(results.has_more);
    assert_eq!(results.documents[0].date, date(2020, 3, 9));
    assert_eq!(results.documents[1].date, date(2020, 3, 5));

    assert!(h.events.get_by_stack_id("", FindOptions::new()).await.unwrap().is_empty());
}

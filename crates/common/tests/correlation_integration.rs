//! Integration tests for correlation tracking
//!
//! Tests concurrent creation, bounded history, snapshot persistence,
//! TTL sweeps and shutdown on the public tracker API.

#![cfg(feature = "runtime")]

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tempfile::TempDir;
use warden_common::correlation::{
    global_tracker, CorrelationContext, CorrelationError, CorrelationStatus, CorrelationTracker,
    CorrelationUpdate, TrackerConfig,
};
use warden_common::testing::MockClock;

fn tracker_with_history(size: usize) -> CorrelationTracker {
    CorrelationTracker::new(TrackerConfig::builder().max_history_size(size).build().unwrap())
        .unwrap()
}

/// Validates that concurrently created correlations all receive distinct
/// ids and are all visible as active.
///
/// # Test Steps
/// 1. Spawn 8 threads, each creating 50 correlations on a shared tracker
/// 2. Collect the returned ids
/// 3. Verify 400 distinct ids and 400 active correlations
#[test]
fn test_concurrent_creation_unique_ids() {
    let tracker = Arc::new(CorrelationTracker::with_defaults());

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                (0..50)
                    .map(|i| {
                        tracker
                            .create_correlation("agent_spawn", &format!("w{worker}-{i}"), "system", None)
                            .correlation_id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let ids: HashSet<String> =
        handles.into_iter().flat_map(|handle| handle.join().unwrap()).collect();

    assert_eq!(ids.len(), 400);
    assert_eq!(tracker.get_statistics().active_count, 400);
}

/// Validates that concurrent completion moves every correlation to history
/// exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completion_from_tasks() {
    let tracker = Arc::new(tracker_with_history(1_000));
    let ids: Vec<String> = (0..100)
        .map(|i| tracker.create_correlation("validation", &format!("doc-{i}"), "alice", None).correlation_id)
        .collect();

    let tasks: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                let first = tracker.complete_correlation(&id, CorrelationStatus::Completed, None, None);
                let second = tracker.complete_correlation(&id, CorrelationStatus::Failed, None, None);
                (first, second)
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        let (first, second) = result.unwrap();
        assert!(first);
        assert!(!second, "A finished correlation cannot be completed again");
    }

    let stats = tracker.get_statistics();
    assert_eq!(stats.active_count, 0);
    assert_eq!(stats.history_size, 100);
    assert_eq!(stats.status_distribution.get(&CorrelationStatus::Completed), Some(&100));
}

/// Validates that history keeps only the most recent finished correlations.
#[test]
fn test_history_eviction_keeps_most_recent() {
    let tracker = tracker_with_history(10);

    let ids: Vec<String> = (0..15)
        .map(|i| {
            let id = tracker.create_correlation("policy", &format!("p{i}"), "system", None).correlation_id;
            assert!(tracker.complete_correlation(&id, CorrelationStatus::Completed, None, None));
            id
        })
        .collect();

    let history = tracker.history(None);
    assert_eq!(history.len(), 10);
    assert_eq!(history[0].correlation_id, ids[14], "Most recent first");
    assert_eq!(history[9].correlation_id, ids[5]);
    assert!(tracker.get_correlation(&ids[4]).is_none());
}

/// Validates the full lifecycle of a persisted correlation.
///
/// # Test Steps
/// 1. Configure a tracker with a temporary persistence directory
/// 2. Create, annotate and fail a correlation
/// 3. Verify `<id>.json` is the only file written and loads back with
///    every field intact
/// 4. Verify the stored duration matches `end_time - start_time`
#[test]
fn test_persisted_snapshot_round_trip() {
    let dir = TempDir::new().unwrap();
    let tracker = CorrelationTracker::new(
        TrackerConfig::builder().persistence_dir(dir.path()).build().unwrap(),
    )
    .unwrap();

    let mut metadata = Map::new();
    metadata.insert("document".to_string(), json!("handbook.md"));
    let id = tracker
        .create_correlation("documentation_validation", "validate", "bob", Some(metadata))
        .correlation_id;

    assert!(tracker.add_checkpoint(&id, "parsed"));
    assert!(tracker.add_metric(&id, "sections", 12.0));
    assert!(tracker.add_event(&id, "rule_hit", json!({"rule": "R-7"})));
    assert!(tracker.update_correlation(&id, CorrelationUpdate::new().warning("deprecated heading")));
    assert!(tracker.complete_correlation(
        &id,
        CorrelationStatus::Failed,
        Some(json!({"violations": 2})),
        Some("2 violations".to_string()),
    ));

    let snapshot_path = dir.path().join(format!("{id}.json"));
    assert!(snapshot_path.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1, "One snapshot per completion");

    let loaded = tracker.load_persisted(&id).unwrap();
    assert_eq!(loaded.status, CorrelationStatus::Failed);
    assert_eq!(loaded.user, "bob");
    assert_eq!(loaded.metadata.get("document"), Some(&json!("handbook.md")));
    assert_eq!(loaded.checkpoints, vec!["parsed".to_string()]);
    assert_eq!(loaded.metrics.get("sections"), Some(&12.0));
    assert_eq!(loaded.events.len(), 1);
    assert_eq!(loaded.warnings, vec!["deprecated heading".to_string()]);
    assert!(loaded.errors.iter().any(|e| e == "2 violations"));
    assert_eq!(loaded.result, Some(json!({"violations": 2})));
    let end_time = loaded.end_time.unwrap();
    let expected = (end_time - loaded.start_time).num_microseconds().unwrap() as f64 / 1e6;
    let duration = loaded.duration.unwrap();
    assert!(duration >= 0.0);
    assert!((duration - expected).abs() < 1e-6, "duration {duration} != {expected}");
    assert_eq!(tracker.get_statistics().persistence_failures, 0);
}

#[test]
fn test_load_persisted_errors() {
    let tracker = CorrelationTracker::with_defaults();
    assert!(matches!(tracker.load_persisted("abc"), Err(CorrelationError::PersistenceDisabled)));

    let dir = TempDir::new().unwrap();
    let tracker = CorrelationTracker::new(
        TrackerConfig::builder().persistence_dir(dir.path()).build().unwrap(),
    )
    .unwrap();
    assert!(matches!(tracker.load_persisted("abc"), Err(CorrelationError::SnapshotMissing(_))));
}

/// Validates that exported history parses back as a list of contexts.
#[test]
fn test_export_history() {
    let dir = TempDir::new().unwrap();
    let tracker = tracker_with_history(50);
    for i in 0..3 {
        let id = tracker.create_correlation("agent_spawn", &format!("agent-{i}"), "system", None).correlation_id;
        tracker.complete_correlation(&id, CorrelationStatus::Completed, Some(Value::from(i)), None);
    }

    let path = dir.path().join("nested").join("history.json");
    assert_eq!(tracker.export(&path).unwrap(), 3);

    let exported: Vec<CorrelationContext> =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(exported.len(), 3);
    assert!(exported.iter().all(|c| c.status == CorrelationStatus::Completed));
}

/// Validates that the TTL sweep times out only stale correlations.
#[test]
fn test_cleanup_expired_with_mock_clock() {
    let clock = MockClock::new();
    let tracker = CorrelationTracker::with_clock(
        TrackerConfig::builder().correlation_ttl(Duration::from_secs(60)).build().unwrap(),
        Arc::new(clock.clone()),
    )
    .unwrap();

    let stale = tracker.create_correlation("validation", "old", "system", None).correlation_id;
    clock.advance_secs(45);
    let fresh = tracker.create_correlation("validation", "new", "system", None).correlation_id;
    clock.advance_secs(30);

    assert_eq!(tracker.cleanup_expired(), 1);

    let timed_out = tracker.get_correlation(&stale).unwrap();
    assert_eq!(timed_out.status, CorrelationStatus::Timeout);
    assert!(!timed_out.errors.is_empty());
    assert_eq!(tracker.get_correlation(&fresh).unwrap().status, CorrelationStatus::InProgress);
    assert_eq!(tracker.cleanup_expired(), 0);
}

#[tokio::test]
async fn test_shutdown_cancels_active() {
    let tracker = Arc::new(CorrelationTracker::with_defaults());
    assert!(tracker.start_cleanup_task());

    let done = tracker.create_correlation("policy", "a", "system", None).correlation_id;
    tracker.complete_correlation(&done, CorrelationStatus::Completed, None, None);
    for name in ["b", "c"] {
        tracker.create_correlation("policy", name, "system", None);
    }

    assert_eq!(tracker.shutdown(), 2);

    let stats = tracker.get_statistics();
    assert_eq!(stats.active_count, 0);
    assert_eq!(stats.status_distribution.get(&CorrelationStatus::Cancelled), Some(&2));
    assert_eq!(stats.status_distribution.get(&CorrelationStatus::Completed), Some(&1));
}

#[test]
fn test_query_by_user_and_status() {
    let tracker = CorrelationTracker::with_defaults();
    let alice = tracker.create_correlation("validation", "a", "alice", None).correlation_id;
    tracker.create_correlation("validation", "b", "bob", None);
    tracker.complete_correlation(&alice, CorrelationStatus::Failed, None, Some("boom".to_string()));
    tracker.create_correlation("validation", "c", "alice", None);

    let alices = tracker.query(|c| c.user == "alice", None);
    assert_eq!(alices.len(), 2);

    let failed = tracker.query(|c| c.status == CorrelationStatus::Failed, Some(5));
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].correlation_id, alice);
}

#[test]
fn test_global_tracker_is_shared() {
    let first = global_tracker();
    let second = global_tracker();
    assert!(Arc::ptr_eq(&first, &second));

    let id = first.create_correlation("agent_spawn", "global", "system", None).correlation_id;
    assert!(second.get_correlation(&id).is_some());
    assert!(second.complete_correlation(&id, CorrelationStatus::Completed, None, None));
}

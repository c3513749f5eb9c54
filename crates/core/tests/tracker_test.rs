//! Integration tests for EventTracker flush behavior
//!
//! Run with: cargo test -p analytics-core --test tracker_test

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use analytics_core::realtime::{name_key, user_key};
use analytics_core::{
    CreateEventRequest, Event, EventCategory, EventTracker, FlushOutcome, InMemoryCache,
    InMemoryEventStore, RealtimeCache, TrackerConfig, ValidationIssue,
};

fn request(name: &str) -> CreateEventRequest {
    CreateEventRequest::new(EventCategory::UserInteraction, name)
}

fn names(events: &[Event]) -> Vec<String> {
    events.iter().map(|e| e.event_name.clone()).collect()
}

fn manual_config(batch_size: usize) -> TrackerConfig {
    TrackerConfig::default()
        .with_batch_size(batch_size)
        .with_scheduled_flush(false)
}

fn setup(config: TrackerConfig) -> (EventTracker, Arc<InMemoryEventStore>) {
    let store = Arc::new(InMemoryEventStore::new());
    let tracker = EventTracker::new(config, store.clone());
    (tracker, store)
}

/// Poll a condition, yielding to background tasks in between
async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {}", what);
}

#[tokio::test]
async fn test_reaching_batch_size_flushes_in_background() {
    let (tracker, store) = setup(manual_config(3));

    tracker.track(request("A")).unwrap();
    tracker.track(request("B")).unwrap();
    assert_eq!(store.attempt_count(), 0);

    tracker.track(request("C")).unwrap();
    eventually("threshold flush", || store.event_count() == 3).await;

    assert_eq!(store.attempt_count(), 1);
    assert_eq!(names(&store.events()), vec!["A", "B", "C"]);
    assert_eq!(tracker.buffered_len(), 0);
}

#[tokio::test]
async fn test_events_tracked_during_failed_flush_stay_behind_batch() {
    let (tracker, store) = setup(manual_config(2));
    store.set_failing(true);
    store.hold();

    tracker.track(request("E1")).unwrap();
    tracker.track(request("E2")).unwrap();
    eventually("insert in flight", || store.attempt_count() == 1).await;

    tracker.track(request("E3")).unwrap();
    assert_eq!(tracker.buffered_len(), 1);

    store.release();
    eventually("batch re-queued", || tracker.buffered_len() == 3).await;

    let attempts = store.insert_attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(names(&attempts[0]), vec!["E1", "E2"]);
    assert_eq!(names(&tracker.buffered_events()), vec!["E1", "E2", "E3"]);
}

#[tokio::test]
async fn test_at_most_one_threshold_flush_queued() {
    let (tracker, store) = setup(manual_config(2));
    store.hold();

    tracker.track(request("E1")).unwrap();
    tracker.track(request("E2")).unwrap();
    eventually("first insert in flight", || store.attempt_count() == 1).await;

    for name in ["E3", "E4", "E5", "E6"] {
        tracker.track(request(name)).unwrap();
    }

    store.release();
    eventually("all events written", || store.event_count() == 6).await;

    let attempts = store.insert_attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(names(&attempts[0]), vec!["E1", "E2"]);
    assert_eq!(names(&attempts[1]), vec!["E3", "E4", "E5", "E6"]);
}

#[tokio::test]
async fn test_retry_preserves_order() {
    let (tracker, store) = setup(manual_config(100));
    tracker.track(request("A")).unwrap();
    tracker.track(request("B")).unwrap();

    store.fail_next(1);
    assert!(matches!(
        tracker.flush().await,
        FlushOutcome::Failed { attempted: 2, .. }
    ));

    tracker.track(request("C")).unwrap();
    assert_eq!(tracker.flush().await, FlushOutcome::Written { count: 3 });
    assert_eq!(names(&store.events()), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_overflow_truncates_to_batch_size() {
    let (tracker, store) = setup(manual_config(3));
    store.set_failing(true);

    for i in 0..7 {
        tracker.track(request(&format!("E{i}"))).unwrap();
    }
    eventually("failed flush", || {
        store.attempt_count() == 1 && tracker.buffered_len() == 3
    })
    .await;

    assert_eq!(store.insert_attempts()[0].len(), 7);
    assert_eq!(names(&tracker.buffered_events()), vec!["E0", "E1", "E2"]);
}

#[tokio::test]
async fn test_cap_not_applied_at_twice_batch_size() {
    let (tracker, store) = setup(manual_config(5));
    store.fail_next(2);

    for i in 0..4 {
        tracker.track(request(&format!("B{i}"))).unwrap();
    }
    tracker.flush().await;
    assert_eq!(tracker.buffered_len(), 4);

    for i in 0..6 {
        tracker.track(request(&format!("N{i}"))).unwrap();
    }
    eventually("second failed flush", || {
        store.attempt_count() == 2 && tracker.buffered_len() == 10
    })
    .await;
    assert_eq!(store.insert_attempts()[1].len(), 10);

    assert_eq!(tracker.flush().await, FlushOutcome::Written { count: 10 });
}

#[tokio::test]
async fn test_rejected_event_changes_nothing() {
    let (tracker, store) = setup(manual_config(1));

    let err = tracker.track(request("1-bad")).unwrap_err();
    assert!(err.contains(&ValidationIssue::InvalidEventName));

    let future = Utc::now() + chrono::Duration::hours(1);
    let err = tracker
        .track(request("Valid").with_timestamp(future))
        .unwrap_err();
    assert!(err.contains(&ValidationIssue::FutureTimestamp));

    assert_eq!(tracker.buffered_len(), 0);
    assert_eq!(tracker.flush().await, FlushOutcome::Empty);
    assert_eq!(store.attempt_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timer_flushes_after_interval() {
    let config = TrackerConfig::default()
        .with_batch_size(100)
        .with_flush_interval(Duration::from_millis(5000));
    let (tracker, store) = setup(config);
    tracker.start();

    tracker.track(request("Tick")).unwrap();

    tokio::time::sleep(Duration::from_millis(4999)).await;
    assert_eq!(store.event_count(), 0);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(store.event_count(), 1);

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_and_stops_timer() {
    let config = TrackerConfig::default()
        .with_batch_size(100)
        .with_flush_interval(Duration::from_millis(1000));
    let (tracker, store) = setup(config);
    tracker.start();

    tracker.track(request("A")).unwrap();
    tracker.track(request("B")).unwrap();

    assert_eq!(
        tracker.shutdown().await,
        Some(FlushOutcome::Written { count: 2 })
    );
    assert_eq!(store.event_count(), 2);

    tracker.track(request("Late")).unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(store.attempt_count(), 1);
    assert_eq!(tracker.buffered_len(), 1);
}

#[tokio::test]
async fn test_no_threshold_flush_after_shutdown() {
    let (tracker, store) = setup(manual_config(2));
    assert_eq!(tracker.shutdown().await, Some(FlushOutcome::Empty));

    tracker.track(request("A")).unwrap();
    tracker.track(request("B")).unwrap();
    tracker.track(request("C")).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.attempt_count(), 0);
    assert_eq!(tracker.buffered_len(), 3);

    assert_eq!(tracker.flush().await, FlushOutcome::Written { count: 3 });
}

#[tokio::test]
async fn test_cache_side_effects_written() {
    let store = Arc::new(InMemoryEventStore::new());
    let cache = Arc::new(InMemoryCache::new());
    let tracker = EventTracker::new(manual_config(100), store.clone()).with_cache(cache.clone());

    let id = tracker
        .track(
            request("LessonOpened")
                .with_user_id("learner_1")
                .with_properties(json!({"lesson": 4})),
        )
        .unwrap();
    tracker.shutdown().await;

    let realtime = RealtimeCache::new(cache.clone());
    let cached = realtime.cached_event(id).await.unwrap().unwrap();
    assert_eq!(cached.event_name, "LessonOpened");
    assert_eq!(cached.properties["lesson"], 4);

    let recent = realtime.recent_events(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, id);

    assert_eq!(realtime.read_counter(&name_key("LessonOpened")).await.unwrap(), 1);
    assert_eq!(realtime.read_counter(&user_key("learner_1")).await.unwrap(), 1);
    assert_eq!(store.event_count(), 1);
}

#[tokio::test]
async fn test_cache_failure_never_affects_track() {
    let store = Arc::new(InMemoryEventStore::new());
    let cache = Arc::new(InMemoryCache::new());
    cache.set_failing(true);
    let tracker = EventTracker::new(manual_config(100), store.clone()).with_cache(cache);

    assert!(tracker.track(request("StillAccepted")).is_ok());
    assert_eq!(tracker.buffered_len(), 1);

    tracker.shutdown().await;
    assert_eq!(store.event_count(), 1);
}

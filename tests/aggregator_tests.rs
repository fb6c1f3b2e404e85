// Aggregator behavior against a scripted DataSource: settlement, isolation, ordering, staleness

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use t1d_pulse::aggregator::{Aggregator, AggregatorError, AggregatorOptions, Category};
use t1d_pulse::fetch_client::{Endpoint, FetchError};
use t1d_pulse::models::SlotPhase;

#[tokio::test]
async fn refresh_one_success_populates_slot() {
    let source = FakeSource::new();
    source.ok(&url("glucose"), json!([{"date": "2024-01-01", "value": 118}]));
    let agg = aggregator(&["glucose", "summary"], source.clone());

    let slot = agg.refresh_one("glucose").await.unwrap();
    assert!(!slot.is_loading);
    assert!(slot.error.is_none());
    assert_eq!(slot.phase, SlotPhase::Success);
    assert_eq!(slot.data, Some(json!([{"date": "2024-01-01", "value": 118}])));
    assert!(slot.last_updated.is_some());

    let snapshot = agg.snapshot().await;
    assert_eq!(snapshot.slot("summary").unwrap().phase, SlotPhase::Idle);
    assert_eq!(source.calls(&url("summary")), 0);
}

#[tokio::test]
async fn refresh_one_failure_keeps_previous_data() {
    let source = FakeSource::new();
    source.ok(&url("insulin"), json!({"units": 30}));
    source.fail(
        &url("insulin"),
        FetchError::Http {
            status: 502,
            message: None,
        },
    );
    let agg = aggregator(&["insulin"], source);

    agg.refresh_one("insulin").await.unwrap();
    let slot = agg.refresh_one("insulin").await.unwrap();

    assert!(!slot.is_loading);
    assert_eq!(slot.phase, SlotPhase::Failure);
    assert_eq!(slot.error.as_deref(), Some("HTTP 502"));
    assert_eq!(slot.data, Some(json!({"units": 30})));
}

#[tokio::test]
async fn refresh_all_isolates_partial_failure() {
    let source = FakeSource::new();
    source.ok(&url("glucose"), json!([{"date": "2024-01-01", "value": 118}]));
    source.fail(
        &url("summary"),
        FetchError::Http {
            status: 500,
            message: None,
        },
    );
    let agg = aggregator(&["glucose", "summary"], source);

    let snapshot = agg.refresh_all().await;

    let glucose = snapshot.slot("glucose").unwrap();
    assert_eq!(glucose.data, Some(json!([{"date": "2024-01-01", "value": 118}])));
    assert!(glucose.error.is_none());

    let summary = snapshot.slot("summary").unwrap();
    assert!(summary.data.is_none());
    assert_eq!(summary.error.as_deref(), Some("HTTP 500"));

    assert!(!snapshot.global_is_loading);
    assert_eq!(snapshot.global_error.as_deref(), Some("HTTP 500"));
    assert_eq!(snapshot.errors.len(), 1);
    assert_eq!(snapshot.errors[0].category, "summary");
}

#[tokio::test]
async fn refresh_all_keeps_declaration_order() {
    let source = FakeSource::new();
    for name in ["patterns", "glucose", "summary"] {
        source.ok(&url(name), json!(name));
    }
    let agg = aggregator(&["patterns", "glucose", "summary"], source);
    let names: Vec<String> = agg
        .refresh_all()
        .await
        .slots
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["patterns", "glucose", "summary"]);
}

#[tokio::test(start_paused = true)]
async fn fast_category_is_visible_before_slow_one_settles() {
    let source = FakeSource::new();
    source.ok_after(&url("slow"), ms(500), json!("slow"));
    source.ok_after(&url("fast"), ms(10), json!("fast"));
    let agg = aggregator(&["slow", "fast"], source);

    let task = {
        let agg = agg.clone();
        tokio::spawn(async move { agg.refresh_all().await })
    };
    tokio::time::sleep(ms(50)).await;

    let mid = agg.snapshot().await;
    assert_eq!(mid.slot("fast").unwrap().data, Some(json!("fast")));
    assert!(!mid.slot("fast").unwrap().is_loading);
    assert!(mid.slot("slow").unwrap().is_loading);
    assert!(mid.global_is_loading);

    let done = task.await.unwrap();
    assert_eq!(done.slot("slow").unwrap().data, Some(json!("slow")));
    assert!(!done.global_is_loading);
}

#[tokio::test(start_paused = true)]
async fn observers_see_each_settlement_in_order() {
    let source = FakeSource::new();
    source.ok_after(&url("slow"), ms(500), json!(1));
    source.ok_after(&url("fast"), ms(10), json!(2));
    let agg = aggregator(&["slow", "fast"], source);
    let mut rx = agg.subscribe();

    agg.refresh_all().await;

    let mut snapshots = Vec::new();
    while let Ok(s) = rx.try_recv() {
        snapshots.push(s);
    }
    // two begins + two settlements
    assert_eq!(snapshots.len(), 4);
    let first_settled = snapshots
        .iter()
        .find(|s| s.slots.iter().any(|slot| slot.phase == SlotPhase::Success))
        .expect("a settled snapshot");
    assert_eq!(first_settled.slot("fast").unwrap().phase, SlotPhase::Success);
    assert!(first_settled.slot("slow").unwrap().is_loading);
    assert!(!snapshots.last().unwrap().global_is_loading);
}

#[tokio::test]
async fn refresh_one_is_idempotent_for_stable_backend() {
    let source = FakeSource::new();
    source.ok(&url("patterns"), json!([{"kind": "rising_trend"}]));
    let agg = aggregator(&["patterns"], source);

    let first = agg.refresh_one("patterns").await.unwrap();
    let second = agg.refresh_one("patterns").await.unwrap();
    assert_eq!(first.data, second.data);
    assert_eq!(second.phase, SlotPhase::Success);
}

#[tokio::test(start_paused = true)]
async fn later_issued_request_wins_over_late_response() {
    let source = FakeSource::new();
    source.ok_after(&url("glucose"), ms(300), json!("first"));
    source.ok_after(&url("glucose"), ms(10), json!("second"));
    let agg = aggregator(&["glucose"], source);

    let first = {
        let agg = agg.clone();
        tokio::spawn(async move { agg.refresh_one("glucose").await })
    };
    tokio::time::sleep(ms(1)).await;
    let second = {
        let agg = agg.clone();
        tokio::spawn(async move { agg.refresh_one("glucose").await })
    };

    second.await.unwrap().unwrap();
    first.await.unwrap().unwrap();

    let slot = agg.slot("glucose").await.unwrap();
    assert_eq!(slot.data, Some(json!("second")));
    assert!(slot.error.is_none());
    assert!(!slot.is_loading);
}

#[tokio::test(start_paused = true)]
async fn late_success_does_not_override_newer_failure() {
    let source = FakeSource::new();
    source.ok_after(&url("summary"), ms(300), json!("stale"));
    source.fail_after(&url("summary"), ms(10), FetchError::Application("model offline".into()));
    let agg = aggregator(&["summary"], source);

    let first = {
        let agg = agg.clone();
        tokio::spawn(async move { agg.refresh_one("summary").await })
    };
    tokio::time::sleep(ms(1)).await;
    agg.refresh_one("summary").await.unwrap();
    first.await.unwrap().unwrap();

    let slot = agg.slot("summary").await.unwrap();
    assert!(slot.data.is_none());
    assert_eq!(slot.error.as_deref(), Some("model offline"));
    assert_eq!(slot.phase, SlotPhase::Failure);
}

#[tokio::test(start_paused = true)]
async fn slot_shows_stale_data_while_revalidating() {
    let source = FakeSource::new();
    source.ok(&url("glucose"), json!("v1"));
    source.ok_after(&url("glucose"), ms(100), json!("v2"));
    let agg = aggregator(&["glucose"], source);
    agg.refresh_one("glucose").await.unwrap();

    let task = {
        let agg = agg.clone();
        tokio::spawn(async move { agg.refresh_one("glucose").await })
    };
    tokio::time::sleep(ms(10)).await;
    let slot = agg.slot("glucose").await.unwrap();
    assert!(slot.is_loading);
    assert_eq!(slot.phase, SlotPhase::Loading);
    assert_eq!(slot.data, Some(json!("v1")));

    let slot = task.await.unwrap().unwrap();
    assert_eq!(slot.data, Some(json!("v2")));
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_resolves_as_timeout() {
    let source = FakeSource::new();
    source.ok_after(&url("patterns"), ms(5_000), json!([]));
    let agg = aggregator_with(
        &["patterns"],
        source,
        AggregatorOptions {
            request_timeout: ms(1_000),
            ..AggregatorOptions::default()
        },
    );

    let slot = agg.refresh_one("patterns").await.unwrap();
    assert_eq!(slot.phase, SlotPhase::Failure);
    assert_eq!(slot.error.as_deref(), Some("Request timed out after 1000ms"));
}

#[tokio::test(start_paused = true)]
async fn global_error_tracks_most_recent_failure() {
    let source = FakeSource::new();
    source.fail_after(&url("a"), ms(10), FetchError::Network("refused".into()));
    source.fail_after(&url("b"), ms(20), FetchError::Application("b broke".into()));
    source.ok(&url("b"), json!("ok"));
    let agg = aggregator(&["a", "b"], source);

    let snapshot = agg.refresh_all().await;
    assert_eq!(snapshot.global_error.as_deref(), Some("b broke"));
    assert_eq!(snapshot.errors.len(), 2);

    agg.refresh_one("b").await.unwrap();
    let snapshot = agg.snapshot().await;
    assert_eq!(
        snapshot.global_error.as_deref(),
        Some("Network error: refused")
    );
    assert_eq!(snapshot.errors.len(), 1);
}

#[tokio::test]
async fn unknown_category_is_a_configuration_error() {
    let source = FakeSource::new();
    let agg = aggregator(&["glucose"], source.clone());

    let err = agg.refresh_one("glucsoe").await.unwrap_err();
    assert_eq!(err, AggregatorError::UnknownCategory("glucsoe".into()));
    assert_eq!(source.total_calls(), 0);
    assert!(agg.snapshot().await.global_error.is_none());
}

#[test]
fn construction_rejects_duplicates_and_empty_sets() {
    let source = FakeSource::new();
    let dup = vec![
        Category::new("glucose", Endpoint::get("fake://a")),
        Category::new("glucose", Endpoint::get("fake://b")),
    ];
    let err = Aggregator::new(dup, source.clone(), AggregatorOptions::default()).err();
    assert_eq!(err, Some(AggregatorError::DuplicateCategory("glucose".into())));

    let err = Aggregator::new(Vec::new(), source, AggregatorOptions::default()).err();
    assert_eq!(err, Some(AggregatorError::NoCategories));
}

#[tokio::test]
async fn snapshot_reports_schedule_state() {
    let source = FakeSource::new();
    source.ok(&url("glucose"), json!([]));
    let agg: Arc<Aggregator> = aggregator(&["glucose"], source);

    let next = chrono::Utc::now() + chrono::TimeDelta::minutes(5);
    agg.record_schedule(true, ms(300_000), Some(next)).await;
    let snapshot = agg.snapshot().await;
    assert!(snapshot.is_auto_updating);
    assert_eq!(snapshot.update_interval_ms, 300_000);
    assert_eq!(snapshot.slot("glucose").unwrap().next_update, Some(next));

    agg.record_schedule(false, ms(300_000), None).await;
    let snapshot = agg.snapshot().await;
    assert!(!snapshot.is_auto_updating);
    assert!(snapshot.slot("glucose").unwrap().next_update.is_none());
}

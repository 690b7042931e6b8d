//! Concurrency tests
//!
//! These tests verify the bounded dispatch guarantees and concurrent use of
//! the engine:
//! - Never more than `limit` handlers in flight
//! - The dispatcher returns only after every handler finished
//! - Concurrent evaluation passes for different projects

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use portal_monitoring::alerts::AlertEngine;
use portal_monitoring::config::AlertEngineConfig;
use portal_monitoring::dispatch::run_bounded;
use portal_monitoring::storage::MemoryStore;
use portal_monitoring::storage::schema::MetricSource;
use serde_json::json;
use uuid::Uuid;

use super::helpers::*;

#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispatch_never_exceeds_limit() {
    let stats = Arc::new(InFlight::default());

    let report = run_bounded((0..23u64).collect(), 5, |n| {
        let stats = stats.clone();
        async move {
            let now = stats.current.fetch_add(1, Ordering::SeqCst) + 1;
            stats.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(5 + n % 4 * 5)).await;

            stats.current.fetch_sub(1, Ordering::SeqCst);
            stats.finished.fetch_add(1, Ordering::SeqCst);
        }
    })
    .await;

    assert_eq!(report.completed, 23);
    assert_eq!(stats.finished.load(Ordering::SeqCst), 23);
    assert_eq!(stats.current.load(Ordering::SeqCst), 0);

    let peak = stats.peak.load(Ordering::SeqCst);
    assert!(peak <= 5, "peak of {peak} handlers in flight");
    assert!(peak > 1, "handlers should overlap");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispatch_with_single_permit_is_sequential() {
    let stats = Arc::new(InFlight::default());

    run_bounded((0..6).collect::<Vec<u32>>(), 1, |_| {
        let stats = stats.clone();
        async move {
            let now = stats.current.fetch_add(1, Ordering::SeqCst) + 1;
            stats.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            stats.current.fetch_sub(1, Ordering::SeqCst);
        }
    })
    .await;

    assert_eq!(stats.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_project_evaluations() {
    let store = Arc::new(MemoryStore::new());
    let projects: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();

    for project in &projects {
        store
            .insert_metric(create_metric(*project, Utc::now(), 150.0, "daily"))
            .await;
    }
    store
        .insert_rule(create_test_rule(
            None,
            "threshold",
            MetricSource::Calculated,
            json!({"threshold": 100.0}),
        ))
        .await;

    let engine = Arc::new(AlertEngine::new(store.clone(), &AlertEngineConfig::default()));

    let report = run_bounded(projects.clone(), 3, |project| {
        let engine = engine.clone();
        async move {
            engine.evaluate_rules(project).await.unwrap();
        }
    })
    .await;
    assert_eq!(report.completed, 8);

    let alerts = store.alerts().await;
    assert_eq!(alerts.len(), 8);
    for project in &projects {
        assert_eq!(alerts.iter().filter(|a| a.project_id == *project).count(), 1);
    }

    let receiver = engine.notification_queue();
    let mut queued = 0;
    while receiver.try_recv().await.is_some() {
        queued += 1;
    }
    assert_eq!(queued, 8);
}

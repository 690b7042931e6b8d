//! Integration tests against the SQLite backend
//!
//! These tests verify that:
//! - An evaluation pass persists alerts and honours cooldowns across reopen
//! - The report worker drives executions through the persisted state machine
//! - Stale aggregates are refreshed in place

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use portal_monitoring::alerts::AlertEngine;
use portal_monitoring::config::{AggregationWorkerConfig, AlertEngineConfig, ReportWorkerConfig};
use portal_monitoring::storage::schema::{
    AggregateType, ExecutionStatus, MetricSource, ProjectRecord, ReportExecution, StaleAggregate,
};
use portal_monitoring::storage::sqlite::SqliteStore;
use portal_monitoring::storage::{AlertStore, ReportStore};
use portal_monitoring::workers::{AggregationProcessor, ReportProcessor, SimulatedReportExecutor};
use serde_json::json;
use tempfile::tempdir;
use uuid::Uuid;

use super::helpers::*;

#[tokio::test]
async fn test_alerts_persist_and_cooldown_survives_reopen() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("portal.db");
    let project = Uuid::new_v4();

    {
        let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
        store
            .insert_sensor_reading(&create_reading(project, Utc::now() - TimeDelta::minutes(5), 12.0))
            .await
            .unwrap();
        store
            .insert_sensor_reading(&create_reading(project, Utc::now() - TimeDelta::minutes(15), 18.0))
            .await
            .unwrap();
        store
            .insert_rule(&create_test_rule(
                Some(project),
                "threshold",
                MetricSource::Sensor,
                json!({"threshold": 20.0, "operator": "less_than"}),
            ))
            .await
            .unwrap();

        let engine = AlertEngine::new(store.clone(), &AlertEngineConfig::default());
        let summary = engine.evaluate_rules(project).await.unwrap();
        assert_eq!(summary.triggered, 1);

        let alerts = store.alerts_for_project(project).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].details["current_value"], 15.0);

        store
            .record_notification_attempt(alerts[0].id, true)
            .await
            .unwrap();
        store.close().await;
    }

    let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
    let alerts = store.alerts_for_project(project).await.unwrap();
    assert!(alerts[0].notification_sent);
    assert_eq!(alerts[0].notification_attempts, 1);

    let engine = AlertEngine::new(store.clone(), &AlertEngineConfig::default());
    let summary = engine.evaluate_rules(project).await.unwrap();
    assert_eq!(summary.cooling_down, 1);
    assert_eq!(store.alerts_for_project(project).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_report_worker_on_sqlite() {
    let temp_dir = tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(temp_dir.path().join("portal.db")).await.unwrap());

    let mut executions = vec![];
    for minutes_ago in [30, 20, 10] {
        let mut execution = ReportExecution::pending(Uuid::new_v4());
        execution.triggered_at = Utc::now() - TimeDelta::minutes(minutes_ago);
        execution
            .parameters
            .insert("format".to_string(), json!("pdf"));
        store.insert_execution(&execution).await.unwrap();
        executions.push(execution);
    }

    // oldest first, limited
    let pending = store.fetch_pending_executions(2).await.unwrap();
    assert_eq!(
        pending.iter().map(|e| e.id).collect::<Vec<_>>(),
        vec![executions[0].id, executions[1].id]
    );
    assert_eq!(pending[0].parameters["format"], "pdf");

    let config = ReportWorkerConfig {
        max_concurrent: 2,
        ..Default::default()
    };
    let worker = ReportProcessor::new(
        store.clone(),
        Arc::new(SimulatedReportExecutor::new(std::time::Duration::from_millis(1))),
        config.execution_timeout(),
    )
    .into_worker(&config);

    assert_eq!(worker.poll_once().await.completed, 3);

    for execution in &executions {
        let record = store.execution(execution.id).await.unwrap().unwrap();
        assert_eq!(record.execution.status, ExecutionStatus::Completed);
        assert!(record.completed_at >= record.started_at);
    }
}

#[tokio::test]
async fn test_aggregation_worker_on_sqlite() {
    let temp_dir = tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(temp_dir.path().join("portal.db")).await.unwrap());

    store
        .insert_project(&ProjectRecord {
            id: Uuid::new_v4(),
            name: "Atlantic Forest".to_string(),
            status: "active".to_string(),
            total_area_hectares: 75.0,
        })
        .await
        .unwrap();

    let dashboard = StaleAggregate::new("dashboard:all", AggregateType::DashboardSummary, None);
    let mut aged = StaleAggregate::new("revenue:all", AggregateType::RevenueSummary, None);
    aged.is_stale = false;
    aged.computed_at = Utc::now() - TimeDelta::hours(1);
    store.insert_aggregate(&dashboard).await.unwrap();
    store.insert_aggregate(&aged).await.unwrap();

    let config = AggregationWorkerConfig::default();
    let worker =
        AggregationProcessor::new(store.clone(), config.stale_threshold()).into_worker(&config);

    assert_eq!(worker.poll_once().await.completed, 2);

    let refreshed = store.aggregate(dashboard.id).await.unwrap().unwrap();
    assert!(!refreshed.is_stale);
    assert_eq!(refreshed.data["active_projects"], 1);

    let refreshed = store.aggregate(aged.id).await.unwrap().unwrap();
    assert!(refreshed.computed_at > aged.computed_at);
    assert_eq!(refreshed.data["transaction_count"], 0);

    assert_eq!(worker.poll_once().await.total(), 0);
}

//! Report and aggregation workers driven through their polling loops

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use portal_monitoring::config::{AggregationWorkerConfig, ReportWorkerConfig};
use portal_monitoring::shutdown::Shutdown;
use portal_monitoring::storage::MemoryStore;
use portal_monitoring::storage::schema::{
    AggregateType, CreditRecord, ExecutionStatus, ProjectRecord, ReportExecution, StaleAggregate,
};
use portal_monitoring::workers::report::{ReportError, ReportExecutor};
use portal_monitoring::workers::{AggregationProcessor, ReportProcessor, SimulatedReportExecutor};
use uuid::Uuid;

/// Fails executions whose parameters ask for it
struct ParameterDrivenExecutor;

#[async_trait]
impl ReportExecutor for ParameterDrivenExecutor {
    async fn execute(&self, execution: &ReportExecution) -> Result<(), ReportError> {
        match execution.parameters.get("fail").and_then(|v| v.as_str()) {
            Some(reason) => Err(ReportError::Failed(reason.to_string())),
            None => Ok(()),
        }
    }
}

fn report_config() -> ReportWorkerConfig {
    ReportWorkerConfig {
        poll_interval_secs: 3600,
        batch_size: 10,
        max_concurrent: 3,
        execution_timeout_secs: 5,
    }
}

#[tokio::test]
async fn test_report_batch_reaches_terminal_states() {
    let store = Arc::new(MemoryStore::new());

    let ok = ReportExecution::pending(Uuid::new_v4());
    let mut failing = ReportExecution::pending(Uuid::new_v4());
    failing
        .parameters
        .insert("fail".to_string(), serde_json::json!("missing carbon baseline"));
    store.insert_execution(ok.clone()).await;
    store.insert_execution(failing.clone()).await;

    let worker = ReportProcessor::new(
        store.clone(),
        Arc::new(ParameterDrivenExecutor),
        report_config().execution_timeout(),
    )
    .into_worker(&report_config());

    let report = worker.poll_once().await;
    assert_eq!(report.completed, 2);

    let ok = store.execution(ok.id).await.unwrap();
    assert_eq!(ok.execution.status, ExecutionStatus::Completed);
    assert!(ok.started_at.is_some() && ok.completed_at.is_some());

    let failing = store.execution(failing.id).await.unwrap();
    assert_eq!(failing.execution.status, ExecutionStatus::Failed);
    assert_eq!(
        failing.error_message.as_deref(),
        Some("missing carbon baseline")
    );

    // terminal executions are never picked up again
    assert_eq!(worker.poll_once().await.total(), 0);
}

#[tokio::test]
async fn test_report_timeout_marks_failed() {
    let store = Arc::new(MemoryStore::new());
    let execution = ReportExecution::pending(Uuid::new_v4());
    store.insert_execution(execution.clone()).await;

    let processor = ReportProcessor::new(
        store.clone(),
        Arc::new(SimulatedReportExecutor::new(Duration::from_secs(10))),
        Duration::from_millis(50),
    );
    processor.process_execution(execution.clone()).await;

    let record = store.execution(execution.id).await.unwrap();
    assert_eq!(record.execution.status, ExecutionStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("execution timed out after 50ms")
    );
}

#[tokio::test]
async fn test_report_worker_runs_until_cancelled() {
    let store = Arc::new(MemoryStore::new());
    let execution = ReportExecution::pending(Uuid::new_v4());
    store.insert_execution(execution.clone()).await;

    let worker = Arc::new(
        ReportProcessor::new(
            store.clone(),
            Arc::new(SimulatedReportExecutor::new(Duration::from_millis(1))),
            Duration::from_secs(5),
        )
        .into_worker(&report_config()),
    );
    let cancel = Shutdown::new();

    let handle = {
        let worker = worker.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.start(&cancel).await })
    };

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let record = store.execution(execution.id).await.unwrap();
            if record.execution.status == ExecutionStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("execution should complete on the first tick");

    cancel.request();
    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker should stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_aggregation_batch_refreshes_known_types_only() {
    let store = Arc::new(MemoryStore::new());
    let project = Uuid::new_v4();

    store
        .insert_project(ProjectRecord {
            id: project,
            name: "Cerrado Restoration".to_string(),
            status: "active".to_string(),
            total_area_hectares: 310.5,
        })
        .await;
    store
        .insert_credit(CreditRecord {
            id: Uuid::new_v4(),
            project_id: project,
            calculated_tons: 40.0,
            issued_tons: 25.0,
            data_quality_score: Some(0.9),
        })
        .await;

    let project_summary = StaleAggregate::new(
        format!("project:{project}"),
        AggregateType::ProjectSummary,
        Some(project),
    );
    let credits = StaleAggregate::new("credits:all", AggregateType::CreditSummary, None);
    let unknown = StaleAggregate::new("biodiversity:all", "biodiversity_index".into(), None);

    // fresh and not flagged: not selected
    let mut fresh = StaleAggregate::new("dashboard:all", AggregateType::DashboardSummary, None);
    fresh.is_stale = false;
    fresh.computed_at = Utc::now() - TimeDelta::minutes(1);

    for aggregate in [&project_summary, &credits, &unknown, &fresh] {
        store.insert_aggregate(aggregate.clone()).await;
    }

    let config = AggregationWorkerConfig::default();
    let worker = AggregationProcessor::new(store.clone(), config.stale_threshold()).into_worker(&config);

    let report = worker.poll_once().await;
    assert_eq!(report.completed, 3);

    let refreshed = store.aggregate(project_summary.id).await.unwrap();
    assert!(!refreshed.is_stale);
    assert_eq!(refreshed.data["name"], "Cerrado Restoration");
    assert_eq!(refreshed.data["total_credits"], 25.0);
    assert_eq!(refreshed.data["credit_count"], 1);

    let refreshed = store.aggregate(credits.id).await.unwrap();
    assert!(!refreshed.is_stale);
    assert_eq!(refreshed.data["average_quality_score"], 0.9);

    let skipped = store.aggregate(unknown.id).await.unwrap();
    assert!(skipped.is_stale);
    assert!(skipped.data.is_empty());

    let untouched = store.aggregate(fresh.id).await.unwrap();
    assert_eq!(untouched.computed_at, fresh.computed_at);

    // only the unknown aggregate is still stale
    let report = worker.poll_once().await;
    assert_eq!(report.completed, 1);
}

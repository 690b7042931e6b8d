//! Store trait definitions
//!
//! The store is split by consumer: the alert engine, the report worker and the
//! aggregation worker each depend only on the operations they issue. A single
//! backend ([`MemoryStore`](super::memory::MemoryStore),
//! [`SqliteStore`](super::sqlite::SqliteStore)) implements all three.
//!
//! ## Thread Safety
//!
//! Implementations must be `Send + Sync`; they are shared across the
//! dispatcher's concurrently running handlers behind an `Arc`.
//!
//! ## Consistency
//!
//! The store is the single source of truth and serializes conflicting writes.
//! Callers perform no locking of their own.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::StorageResult;
use super::schema::{
    Alert, AlertRule, CreditSummary, DashboardSummary, ExecutionStatus, JsonMap, ProjectMetric,
    ProjectSummary, ReportExecution, RevenueSummary, SatelliteObservation, SensorReading,
    StaleAggregate,
};

/// Operations consumed by the alert rule evaluation engine
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Active rules scoped to `project_id`, including global rules
    ///
    /// `None` returns every active rule.
    async fn fetch_active_rules(&self, project_id: Option<Uuid>) -> StorageResult<Vec<AlertRule>>;

    /// Whether an alert for (rule, project) was triggered within the last
    /// `cooldown_minutes`
    async fn check_cooldown(
        &self,
        rule_id: Uuid,
        project_id: Uuid,
        cooldown_minutes: u32,
    ) -> StorageResult<bool>;

    async fn create_alert(&self, alert: &Alert) -> StorageResult<()>;

    /// Count one notification attempt, marking the alert sent on success
    async fn record_notification_attempt(&self, alert_id: Uuid, sent: bool) -> StorageResult<()>;

    /// Sensor readings of one type between `start` and `end` (inclusive),
    /// newest first
    async fn fetch_sensor_readings(
        &self,
        project_id: Uuid,
        sensor_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<SensorReading>>;

    async fn fetch_latest_satellite_observation(
        &self,
        project_id: Uuid,
        satellite_source: &str,
    ) -> StorageResult<Option<SatelliteObservation>>;

    async fn fetch_latest_metric(
        &self,
        project_id: Uuid,
        metric_name: &str,
        aggregation_period: &str,
    ) -> StorageResult<Option<ProjectMetric>>;

    /// Metric values between `start` and `end` (inclusive), oldest first
    async fn fetch_metric_series(
        &self,
        project_id: Uuid,
        metric_name: &str,
        aggregation_period: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<ProjectMetric>>;
}

/// Operations consumed by the report execution worker
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Up to `limit` pending executions, oldest trigger first
    async fn fetch_pending_executions(&self, limit: usize) -> StorageResult<Vec<ReportExecution>>;

    /// Move an execution to `status`
    ///
    /// Rejects transitions the execution state machine does not allow with
    /// [`StorageError::InvalidTransition`](super::StorageError::InvalidTransition).
    async fn update_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error_message: Option<String>,
    ) -> StorageResult<()>;
}

/// Operations consumed by the aggregation refresh worker
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Up to `limit` aggregates that are flagged stale or were computed more
    /// than `stale_threshold` ago, least recently computed first
    async fn fetch_stale_aggregates(
        &self,
        stale_threshold: Duration,
        limit: usize,
    ) -> StorageResult<Vec<StaleAggregate>>;

    /// Overwrite the payload, clear the stale flag and advance `computed_at`
    async fn update_aggregate(&self, id: Uuid, data: JsonMap) -> StorageResult<()>;

    async fn dashboard_summary(&self, project_id: Option<Uuid>)
    -> StorageResult<DashboardSummary>;

    async fn project_summary(&self, project_id: Uuid) -> StorageResult<ProjectSummary>;

    async fn credit_summary(&self, project_id: Option<Uuid>) -> StorageResult<CreditSummary>;

    async fn revenue_summary(&self, project_id: Option<Uuid>) -> StorageResult<RevenueSummary>;
}

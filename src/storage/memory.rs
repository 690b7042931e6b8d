//! In-memory store (no persistence)
//!
//! This backend keeps every table in process memory behind a single lock.
//! It's useful for:
//! - Testing the engine and workers without database dependencies
//! - Running the binaries with `{"backend": "none"}`
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Single lock**: Writes serialize; fine for tests and small deployments

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::backend::{AggregateStore, AlertStore, ReportStore};
use super::error::{StorageError, StorageResult};
use super::schema::{
    Alert, AlertRule, CreditRecord, CreditSummary, DashboardSummary, ExecutionRecord,
    ExecutionStatus, JsonMap, PaymentRecord, ProjectMetric, ProjectRecord, ProjectSummary,
    ReportExecution, RevenueSummary, SatelliteObservation, SensorReading, StaleAggregate,
};

#[derive(Debug, Default)]
struct Tables {
    rules: Vec<AlertRule>,
    alerts: Vec<Alert>,
    sensor_readings: Vec<SensorReading>,
    satellite_observations: Vec<SatelliteObservation>,
    metrics: Vec<ProjectMetric>,
    executions: Vec<ExecutionRecord>,
    aggregates: Vec<StaleAggregate>,
    projects: Vec<ProjectRecord>,
    credits: Vec<CreditRecord>,
    payments: Vec<PaymentRecord>,
}

/// In-memory store implementing every store trait
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_rule(&self, rule: AlertRule) {
        self.tables.write().await.rules.push(rule);
    }

    pub async fn insert_alert(&self, alert: Alert) {
        self.tables.write().await.alerts.push(alert);
    }

    pub async fn insert_sensor_reading(&self, reading: SensorReading) {
        self.tables.write().await.sensor_readings.push(reading);
    }

    pub async fn insert_satellite_observation(&self, observation: SatelliteObservation) {
        self.tables
            .write()
            .await
            .satellite_observations
            .push(observation);
    }

    pub async fn insert_metric(&self, metric: ProjectMetric) {
        self.tables.write().await.metrics.push(metric);
    }

    pub async fn insert_execution(&self, execution: ReportExecution) {
        self.tables.write().await.executions.push(ExecutionRecord {
            execution,
            error_message: None,
            started_at: None,
            completed_at: None,
        });
    }

    pub async fn insert_aggregate(&self, aggregate: StaleAggregate) {
        self.tables.write().await.aggregates.push(aggregate);
    }

    pub async fn insert_project(&self, project: ProjectRecord) {
        self.tables.write().await.projects.push(project);
    }

    pub async fn insert_credit(&self, credit: CreditRecord) {
        self.tables.write().await.credits.push(credit);
    }

    pub async fn insert_payment(&self, payment: PaymentRecord) {
        self.tables.write().await.payments.push(payment);
    }

    /// All stored alerts, in creation order
    pub async fn alerts(&self) -> Vec<Alert> {
        self.tables.read().await.alerts.clone()
    }

    pub async fn execution(&self, id: Uuid) -> Option<ExecutionRecord> {
        self.tables
            .read()
            .await
            .executions
            .iter()
            .find(|record| record.execution.id == id)
            .cloned()
    }

    pub async fn aggregate(&self, id: Uuid) -> Option<StaleAggregate> {
        self.tables
            .read()
            .await
            .aggregates
            .iter()
            .find(|aggregate| aggregate.id == id)
            .cloned()
    }
}

fn minutes_ago(minutes: u32) -> DateTime<Utc> {
    Utc::now() - TimeDelta::minutes(i64::from(minutes))
}

fn in_scope(scope: Option<Uuid>, project_id: Uuid) -> bool {
    scope.is_none_or(|scope| scope == project_id)
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn fetch_active_rules(&self, project_id: Option<Uuid>) -> StorageResult<Vec<AlertRule>> {
        let tables = self.tables.read().await;

        let rules = tables
            .rules
            .iter()
            .filter(|rule| rule.is_active)
            .filter(|rule| match (project_id, rule.project_id) {
                (Some(project), Some(scope)) => project == scope,
                _ => true,
            })
            .cloned()
            .collect();

        Ok(rules)
    }

    async fn check_cooldown(
        &self,
        rule_id: Uuid,
        project_id: Uuid,
        cooldown_minutes: u32,
    ) -> StorageResult<bool> {
        let since = minutes_ago(cooldown_minutes);
        let tables = self.tables.read().await;

        Ok(tables.alerts.iter().any(|alert| {
            alert.rule_id == Some(rule_id)
                && alert.project_id == project_id
                && alert.trigger_time > since
        }))
    }

    async fn create_alert(&self, alert: &Alert) -> StorageResult<()> {
        debug!("in-memory store: creating alert {}", alert.id);
        self.tables.write().await.alerts.push(alert.clone());
        Ok(())
    }

    async fn record_notification_attempt(&self, alert_id: Uuid, sent: bool) -> StorageResult<()> {
        let mut tables = self.tables.write().await;

        let alert = tables
            .alerts
            .iter_mut()
            .find(|alert| alert.id == alert_id)
            .ok_or(StorageError::NotFound {
                table: "alerts",
                id: alert_id,
            })?;

        alert.notification_attempts += 1;
        if sent {
            alert.notification_sent = true;
        }

        Ok(())
    }

    async fn fetch_sensor_readings(
        &self,
        project_id: Uuid,
        sensor_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<SensorReading>> {
        let tables = self.tables.read().await;

        let mut readings: Vec<SensorReading> = tables
            .sensor_readings
            .iter()
            .filter(|r| r.project_id == project_id && r.sensor_type == sensor_type)
            .filter(|r| r.time >= start && r.time <= end)
            .cloned()
            .collect();

        readings.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(readings)
    }

    async fn fetch_latest_satellite_observation(
        &self,
        project_id: Uuid,
        satellite_source: &str,
    ) -> StorageResult<Option<SatelliteObservation>> {
        let tables = self.tables.read().await;

        Ok(tables
            .satellite_observations
            .iter()
            .filter(|o| o.project_id == project_id && o.satellite_source == satellite_source)
            .max_by_key(|o| o.time)
            .cloned())
    }

    async fn fetch_latest_metric(
        &self,
        project_id: Uuid,
        metric_name: &str,
        aggregation_period: &str,
    ) -> StorageResult<Option<ProjectMetric>> {
        let tables = self.tables.read().await;

        Ok(tables
            .metrics
            .iter()
            .filter(|m| {
                m.project_id == project_id
                    && m.metric_name == metric_name
                    && m.aggregation_period == aggregation_period
            })
            .max_by_key(|m| m.time)
            .cloned())
    }

    async fn fetch_metric_series(
        &self,
        project_id: Uuid,
        metric_name: &str,
        aggregation_period: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<ProjectMetric>> {
        let tables = self.tables.read().await;

        let mut series: Vec<ProjectMetric> = tables
            .metrics
            .iter()
            .filter(|m| {
                m.project_id == project_id
                    && m.metric_name == metric_name
                    && m.aggregation_period == aggregation_period
            })
            .filter(|m| m.time >= start && m.time <= end)
            .cloned()
            .collect();

        series.sort_by_key(|m| m.time);
        Ok(series)
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn fetch_pending_executions(&self, limit: usize) -> StorageResult<Vec<ReportExecution>> {
        let tables = self.tables.read().await;

        // stable sort keeps insertion order for equal trigger times
        let mut pending: Vec<ReportExecution> = tables
            .executions
            .iter()
            .filter(|record| record.execution.status == ExecutionStatus::Pending)
            .map(|record| record.execution.clone())
            .collect();
        pending.sort_by_key(|execution| execution.triggered_at);
        pending.truncate(limit);

        Ok(pending)
    }

    async fn update_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error_message: Option<String>,
    ) -> StorageResult<()> {
        let mut tables = self.tables.write().await;

        let record = tables
            .executions
            .iter_mut()
            .find(|record| record.execution.id == id)
            .ok_or(StorageError::NotFound {
                table: "report_executions",
                id,
            })?;

        let current = record.execution.status;
        if !current.can_transition_to(status) {
            return Err(StorageError::InvalidTransition {
                id,
                from: Some(current),
                to: status,
            });
        }

        let now = Utc::now();
        record.execution.status = status;
        record.error_message = error_message;
        if status == ExecutionStatus::Processing {
            record.started_at = Some(now);
        }
        if status.is_terminal() {
            record.completed_at = Some(now);
        }

        Ok(())
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn fetch_stale_aggregates(
        &self,
        stale_threshold: Duration,
        limit: usize,
    ) -> StorageResult<Vec<StaleAggregate>> {
        let threshold = TimeDelta::from_std(stale_threshold)
            .map_err(|e| StorageError::InvalidConfig(format!("stale threshold: {e}")))?;
        let cutoff = Utc::now().checked_sub_signed(threshold).ok_or_else(|| {
            StorageError::InvalidConfig(format!("stale threshold out of range: {stale_threshold:?}"))
        })?;
        let tables = self.tables.read().await;

        let mut stale: Vec<StaleAggregate> = tables
            .aggregates
            .iter()
            .filter(|aggregate| aggregate.is_stale || aggregate.computed_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|aggregate| aggregate.computed_at);
        stale.truncate(limit);

        Ok(stale)
    }

    async fn update_aggregate(&self, id: Uuid, data: JsonMap) -> StorageResult<()> {
        let mut tables = self.tables.write().await;

        let aggregate = tables
            .aggregates
            .iter_mut()
            .find(|aggregate| aggregate.id == id)
            .ok_or(StorageError::NotFound {
                table: "dashboard_aggregates",
                id,
            })?;

        aggregate.data = data;
        aggregate.is_stale = false;
        aggregate.computed_at = Utc::now();

        Ok(())
    }

    async fn dashboard_summary(
        &self,
        project_id: Option<Uuid>,
    ) -> StorageResult<DashboardSummary> {
        let tables = self.tables.read().await;

        let projects: Vec<&ProjectRecord> = tables
            .projects
            .iter()
            .filter(|project| in_scope(project_id, project.id))
            .collect();

        Ok(DashboardSummary {
            total_projects: projects.len() as i64,
            active_projects: projects.iter().filter(|p| p.status == "active").count() as i64,
            total_area_hectares: projects.iter().map(|p| p.total_area_hectares).sum(),
        })
    }

    async fn project_summary(&self, project_id: Uuid) -> StorageResult<ProjectSummary> {
        let tables = self.tables.read().await;

        let project = tables
            .projects
            .iter()
            .find(|project| project.id == project_id)
            .ok_or(StorageError::NotFound {
                table: "projects",
                id: project_id,
            })?;

        let credits: Vec<&CreditRecord> = tables
            .credits
            .iter()
            .filter(|credit| credit.project_id == project_id)
            .collect();

        Ok(ProjectSummary {
            name: project.name.clone(),
            status: project.status.clone(),
            total_area_hectares: project.total_area_hectares,
            total_credits: credits.iter().map(|c| c.issued_tons).sum(),
            credit_count: credits.len() as i64,
        })
    }

    async fn credit_summary(&self, project_id: Option<Uuid>) -> StorageResult<CreditSummary> {
        let tables = self.tables.read().await;

        let credits: Vec<&CreditRecord> = tables
            .credits
            .iter()
            .filter(|credit| in_scope(project_id, credit.project_id))
            .collect();

        // AVG skips NULL scores, as the SQL backend does
        let scores: Vec<f64> = credits.iter().filter_map(|c| c.data_quality_score).collect();

        Ok(CreditSummary {
            total_calculated: credits.iter().map(|c| c.calculated_tons).sum(),
            total_issued: credits.iter().map(|c| c.issued_tons).sum(),
            average_quality_score: mean(&scores),
        })
    }

    async fn revenue_summary(&self, project_id: Option<Uuid>) -> StorageResult<RevenueSummary> {
        let tables = self.tables.read().await;

        let amounts: Vec<f64> = tables
            .payments
            .iter()
            .filter(|payment| payment.status == "completed")
            .filter(|payment| in_scope(project_id, payment.project_id))
            .map(|payment| payment.amount)
            .collect();

        Ok(RevenueSummary {
            total_revenue: amounts.iter().sum(),
            transaction_count: amounts.len() as i64,
            average_amount: mean(&amounts),
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

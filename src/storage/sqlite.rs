//! SQLite store implementation
//!
//! This module provides a SQLite-based implementation of the store traits.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers (rule evaluation) don't block the workers' writes
//! - **Connection pooling**: Shared by every concurrently dispatched handler
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Encoding
//!
//! - Timestamps are stored as Unix milliseconds
//! - UUIDs are stored as hyphenated text
//! - Free-form mappings (`parameters`, `details`, `condition_config`, `data`)
//!   are stored as JSON text

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::backend::{AggregateStore, AlertStore, ReportStore};
use super::error::{StorageError, StorageResult};
use super::schema::{
    Alert, AlertRule, AlertStatus, CreditRecord, CreditSummary, DashboardSummary,
    ExecutionRecord, ExecutionStatus, JsonMap, MetricSource, PaymentRecord, ProjectMetric,
    ProjectRecord, ProjectSummary, ReportExecution, RevenueSummary, SatelliteObservation,
    SensorReading, StaleAggregate,
};

/// SQLite store
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run migrations
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use portal_monitoring::storage::sqlite::SqliteStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteStore::new("./portal.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("opening SQLite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self { pool })
    }

    /// Close the pool and release connections
    pub async fn close(&self) {
        info!("closing SQLite store");
        self.pool.close().await;
    }

    // ========================================================================
    // Seeding (rows normally written by other services)
    // ========================================================================

    pub async fn insert_rule(&self, rule: &AlertRule) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_rules (
                id, project_id, name, description, condition_type, metric_source,
                metric_name, sensor_type, condition_config, severity,
                notification_channels, cooldown_minutes, is_active
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(rule.id.to_string())
        .bind(rule.project_id.map(|id| id.to_string()))
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(&rule.condition_type)
        .bind(rule.metric_source.as_str())
        .bind(&rule.metric_name)
        .bind(&rule.sensor_type)
        .bind(serde_json::to_string(&rule.condition_config)?)
        .bind(&rule.severity)
        .bind(serde_json::to_string(&rule.notification_channels)?)
        .bind(i64::from(rule.cooldown_minutes))
        .bind(rule.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_sensor_reading(&self, reading: &SensorReading) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sensor_readings (
                time, project_id, sensor_id, sensor_type, value, unit,
                latitude, longitude, battery_level
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(to_millis(&reading.time))
        .bind(reading.project_id.to_string())
        .bind(&reading.sensor_id)
        .bind(&reading.sensor_type)
        .bind(reading.value)
        .bind(&reading.unit)
        .bind(reading.latitude)
        .bind(reading.longitude)
        .bind(reading.battery_level)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_satellite_observation(
        &self,
        observation: &SatelliteObservation,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO satellite_observations (
                time, project_id, satellite_source, tile_id, ndvi, evi, ndwi, savi,
                biomass_kg_per_ha, cloud_coverage_percent
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(to_millis(&observation.time))
        .bind(observation.project_id.to_string())
        .bind(&observation.satellite_source)
        .bind(&observation.tile_id)
        .bind(observation.ndvi)
        .bind(observation.evi)
        .bind(observation.ndwi)
        .bind(observation.savi)
        .bind(observation.biomass_kg_per_ha)
        .bind(observation.cloud_coverage_percent)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_metric(&self, metric: &ProjectMetric) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO project_metrics (time, project_id, metric_name, value, aggregation_period, unit)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(to_millis(&metric.time))
        .bind(metric.project_id.to_string())
        .bind(&metric.metric_name)
        .bind(metric.value)
        .bind(&metric.aggregation_period)
        .bind(&metric.unit)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_execution(&self, execution: &ReportExecution) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO report_executions (
                id, report_definition_id, schedule_id, triggered_by, triggered_at, status, parameters
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.report_definition_id.to_string())
        .bind(execution.schedule_id.map(|id| id.to_string()))
        .bind(execution.triggered_by.map(|id| id.to_string()))
        .bind(to_millis(&execution.triggered_at))
        .bind(execution.status.as_str())
        .bind(serde_json::to_string(&execution.parameters)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_aggregate(&self, aggregate: &StaleAggregate) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dashboard_aggregates (
                id, aggregate_key, aggregate_type, project_id, user_id, period_type,
                data, is_stale, computed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(aggregate.id.to_string())
        .bind(&aggregate.aggregate_key)
        .bind(aggregate.aggregate_type.as_str())
        .bind(aggregate.project_id.map(|id| id.to_string()))
        .bind(aggregate.user_id.map(|id| id.to_string()))
        .bind(&aggregate.period_type)
        .bind(serde_json::to_string(&aggregate.data)?)
        .bind(aggregate.is_stale)
        .bind(to_millis(&aggregate.computed_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_project(&self, project: &ProjectRecord) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO projects (id, name, status, total_area_hectares) VALUES (?, ?, ?, ?)",
        )
        .bind(project.id.to_string())
        .bind(&project.name)
        .bind(&project.status)
        .bind(project.total_area_hectares)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_credit(&self, credit: &CreditRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO carbon_credits (id, project_id, calculated_tons, issued_tons, data_quality_score)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(credit.id.to_string())
        .bind(credit.project_id.to_string())
        .bind(credit.calculated_tons)
        .bind(credit.issued_tons)
        .bind(credit.data_quality_score)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_payment(&self, payment: &PaymentRecord) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO payment_transactions (id, project_id, amount, status) VALUES (?, ?, ?, ?)",
        )
        .bind(payment.id.to_string())
        .bind(payment.project_id.to_string())
        .bind(payment.amount)
        .bind(&payment.status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Alerts for a project, oldest trigger first
    pub async fn alerts_for_project(&self, project_id: Uuid) -> StorageResult<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT id, rule_id, project_id, trigger_time, resolved_time, severity, title,
                   message, details, status, notification_sent, notification_attempts
            FROM alerts
            WHERE project_id = ?
            ORDER BY trigger_time ASC
            "#,
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(alert_from_row).collect()
    }

    pub async fn execution(&self, id: Uuid) -> StorageResult<Option<ExecutionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, report_definition_id, schedule_id, triggered_by, triggered_at, status,
                   parameters, error_message, started_at, completed_at
            FROM report_executions
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> StorageResult<ExecutionRecord> {
            Ok(ExecutionRecord {
                execution: execution_from_row(&row)?,
                error_message: row.try_get("error_message")?,
                started_at: row
                    .try_get::<Option<i64>, _>("started_at")?
                    .map(from_millis),
                completed_at: row
                    .try_get::<Option<i64>, _>("completed_at")?
                    .map(from_millis),
            })
        })
        .transpose()
    }

    pub async fn aggregate(&self, id: Uuid) -> StorageResult<Option<StaleAggregate>> {
        let row = sqlx::query(
            r#"
            SELECT id, aggregate_key, aggregate_type, project_id, user_id, period_type,
                   data, is_stale, computed_at
            FROM dashboard_aggregates
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(aggregate_from_row).transpose()
    }
}

fn to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}

fn parse_uuid(value: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| StorageError::SerializationError(format!("invalid uuid '{value}': {e}")))
}

fn parse_optional_uuid(value: Option<String>) -> StorageResult<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}

fn parse_json_map(value: &str) -> StorageResult<JsonMap> {
    Ok(serde_json::from_str(value)?)
}

fn rule_from_row(row: &SqliteRow) -> StorageResult<AlertRule> {
    let metric_source: String = row.try_get("metric_source")?;
    let metric_source = metric_source
        .parse::<MetricSource>()
        .map_err(StorageError::SerializationError)?;
    let condition_config: String = row.try_get("condition_config")?;
    let channels: String = row.try_get("notification_channels")?;
    let cooldown_minutes: i64 = row.try_get("cooldown_minutes")?;

    Ok(AlertRule {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        project_id: parse_optional_uuid(row.try_get("project_id")?)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        condition_type: row.try_get("condition_type")?,
        metric_source,
        metric_name: row.try_get("metric_name")?,
        sensor_type: row.try_get("sensor_type")?,
        condition_config: serde_json::from_str(&condition_config)?,
        severity: row.try_get("severity")?,
        notification_channels: serde_json::from_str(&channels)?,
        cooldown_minutes: u32::try_from(cooldown_minutes).map_err(|_| {
            StorageError::SerializationError(format!(
                "cooldown_minutes out of range: {cooldown_minutes}"
            ))
        })?,
        is_active: row.try_get("is_active")?,
    })
}

fn alert_from_row(row: &SqliteRow) -> StorageResult<Alert> {
    let status: String = row.try_get("status")?;
    let details: String = row.try_get("details")?;

    Ok(Alert {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        rule_id: parse_optional_uuid(row.try_get("rule_id")?)?,
        project_id: parse_uuid(&row.try_get::<String, _>("project_id")?)?,
        trigger_time: from_millis(row.try_get("trigger_time")?),
        resolved_time: row
            .try_get::<Option<i64>, _>("resolved_time")?
            .map(from_millis),
        severity: row.try_get("severity")?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        details: parse_json_map(&details)?,
        status: status
            .parse::<AlertStatus>()
            .map_err(StorageError::SerializationError)?,
        notification_sent: row.try_get("notification_sent")?,
        notification_attempts: u32::try_from(row.try_get::<i64, _>("notification_attempts")?)
            .unwrap_or(u32::MAX),
    })
}

fn execution_from_row(row: &SqliteRow) -> StorageResult<ReportExecution> {
    let status: String = row.try_get("status")?;
    let parameters: String = row.try_get("parameters")?;

    Ok(ReportExecution {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        report_definition_id: parse_uuid(&row.try_get::<String, _>("report_definition_id")?)?,
        schedule_id: parse_optional_uuid(row.try_get("schedule_id")?)?,
        triggered_by: parse_optional_uuid(row.try_get("triggered_by")?)?,
        triggered_at: from_millis(row.try_get("triggered_at")?),
        status: status
            .parse::<ExecutionStatus>()
            .map_err(StorageError::SerializationError)?,
        parameters: parse_json_map(&parameters)?,
    })
}

fn aggregate_from_row(row: &SqliteRow) -> StorageResult<StaleAggregate> {
    let aggregate_type: String = row.try_get("aggregate_type")?;
    let data: String = row.try_get("data")?;

    Ok(StaleAggregate {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        aggregate_key: row.try_get("aggregate_key")?,
        aggregate_type: aggregate_type.into(),
        project_id: parse_optional_uuid(row.try_get("project_id")?)?,
        user_id: parse_optional_uuid(row.try_get("user_id")?)?,
        period_type: row.try_get("period_type")?,
        is_stale: row.try_get("is_stale")?,
        computed_at: from_millis(row.try_get("computed_at")?),
        data: parse_json_map(&data)?,
    })
}

fn metric_from_row(row: &SqliteRow) -> StorageResult<ProjectMetric> {
    Ok(ProjectMetric {
        time: from_millis(row.try_get("time")?),
        project_id: parse_uuid(&row.try_get::<String, _>("project_id")?)?,
        metric_name: row.try_get("metric_name")?,
        value: row.try_get("value")?,
        aggregation_period: row.try_get("aggregation_period")?,
        unit: row.try_get("unit")?,
    })
}

/// Decode rows one by one, skipping (and logging) rows that fail to decode
fn decode_rows<T>(
    rows: &[SqliteRow],
    table: &str,
    decode: impl Fn(&SqliteRow) -> StorageResult<T>,
) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match decode(row) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("skipping undecodable {} row: {}", table, e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl AlertStore for SqliteStore {
    #[instrument(skip(self))]
    async fn fetch_active_rules(&self, project_id: Option<Uuid>) -> StorageResult<Vec<AlertRule>> {
        let base = r#"
            SELECT id, project_id, name, description, condition_type, metric_source,
                   metric_name, sensor_type, condition_config, severity,
                   notification_channels, cooldown_minutes, is_active
            FROM alert_rules
            WHERE is_active = 1
        "#;

        let rows = match project_id {
            Some(project_id) => {
                let sql = format!("{base} AND (project_id = ? OR project_id IS NULL)");
                sqlx::query(&sql)
                    .bind(project_id.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query(base).fetch_all(&self.pool).await?,
        };

        Ok(decode_rows(&rows, "alert_rules", rule_from_row))
    }

    #[instrument(skip(self))]
    async fn check_cooldown(
        &self,
        rule_id: Uuid,
        project_id: Uuid,
        cooldown_minutes: u32,
    ) -> StorageResult<bool> {
        let since = Utc::now() - TimeDelta::minutes(i64::from(cooldown_minutes));

        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM alerts
                WHERE rule_id = ? AND project_id = ? AND trigger_time > ?
            )
            "#,
        )
        .bind(rule_id.to_string())
        .bind(project_id.to_string())
        .bind(to_millis(&since))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0 != 0)
    }

    #[instrument(skip(self, alert), fields(alert_id = %alert.id))]
    async fn create_alert(&self, alert: &Alert) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, rule_id, project_id, trigger_time, resolved_time, severity, title,
                message, details, status, notification_sent, notification_attempts
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.id.to_string())
        .bind(alert.rule_id.map(|id| id.to_string()))
        .bind(alert.project_id.to_string())
        .bind(to_millis(&alert.trigger_time))
        .bind(alert.resolved_time.as_ref().map(to_millis))
        .bind(&alert.severity)
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(serde_json::to_string(&alert.details)?)
        .bind(alert.status.as_str())
        .bind(alert.notification_sent)
        .bind(i64::from(alert.notification_attempts))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn record_notification_attempt(&self, alert_id: Uuid, sent: bool) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE alerts SET
                notification_attempts = notification_attempts + 1,
                notification_sent = CASE WHEN ? THEN 1 ELSE notification_sent END
            WHERE id = ?
            "#,
        )
        .bind(sent)
        .bind(alert_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                table: "alerts",
                id: alert_id,
            });
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_sensor_readings(
        &self,
        project_id: Uuid,
        sensor_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<SensorReading>> {
        let rows = sqlx::query(
            r#"
            SELECT time, project_id, sensor_id, sensor_type, value, unit,
                   latitude, longitude, battery_level
            FROM sensor_readings
            WHERE project_id = ? AND sensor_type = ? AND time >= ? AND time <= ?
            ORDER BY time DESC
            "#,
        )
        .bind(project_id.to_string())
        .bind(sensor_type)
        .bind(to_millis(&start))
        .bind(to_millis(&end))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StorageResult<SensorReading> {
                Ok(SensorReading {
                    time: from_millis(row.try_get("time")?),
                    project_id,
                    sensor_id: row.try_get("sensor_id")?,
                    sensor_type: row.try_get("sensor_type")?,
                    value: row.try_get("value")?,
                    unit: row.try_get("unit")?,
                    latitude: row.try_get("latitude")?,
                    longitude: row.try_get("longitude")?,
                    battery_level: row.try_get("battery_level")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn fetch_latest_satellite_observation(
        &self,
        project_id: Uuid,
        satellite_source: &str,
    ) -> StorageResult<Option<SatelliteObservation>> {
        let row = sqlx::query(
            r#"
            SELECT time, satellite_source, tile_id, ndvi, evi, ndwi, savi,
                   biomass_kg_per_ha, cloud_coverage_percent
            FROM satellite_observations
            WHERE project_id = ? AND satellite_source = ?
            ORDER BY time DESC
            LIMIT 1
            "#,
        )
        .bind(project_id.to_string())
        .bind(satellite_source)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> StorageResult<SatelliteObservation> {
            Ok(SatelliteObservation {
                time: from_millis(row.try_get("time")?),
                project_id,
                satellite_source: row.try_get("satellite_source")?,
                tile_id: row.try_get("tile_id")?,
                ndvi: row.try_get("ndvi")?,
                evi: row.try_get("evi")?,
                ndwi: row.try_get("ndwi")?,
                savi: row.try_get("savi")?,
                biomass_kg_per_ha: row.try_get("biomass_kg_per_ha")?,
                cloud_coverage_percent: row.try_get("cloud_coverage_percent")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn fetch_latest_metric(
        &self,
        project_id: Uuid,
        metric_name: &str,
        aggregation_period: &str,
    ) -> StorageResult<Option<ProjectMetric>> {
        let row = sqlx::query(
            r#"
            SELECT time, project_id, metric_name, value, aggregation_period, unit
            FROM project_metrics
            WHERE project_id = ? AND metric_name = ? AND aggregation_period = ?
            ORDER BY time DESC
            LIMIT 1
            "#,
        )
        .bind(project_id.to_string())
        .bind(metric_name)
        .bind(aggregation_period)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(metric_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn fetch_metric_series(
        &self,
        project_id: Uuid,
        metric_name: &str,
        aggregation_period: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<ProjectMetric>> {
        let rows = sqlx::query(
            r#"
            SELECT time, project_id, metric_name, value, aggregation_period, unit
            FROM project_metrics
            WHERE project_id = ? AND metric_name = ? AND aggregation_period = ?
              AND time >= ? AND time <= ?
            ORDER BY time ASC
            "#,
        )
        .bind(project_id.to_string())
        .bind(metric_name)
        .bind(aggregation_period)
        .bind(to_millis(&start))
        .bind(to_millis(&end))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(metric_from_row).collect()
    }
}

#[async_trait]
impl ReportStore for SqliteStore {
    #[instrument(skip(self))]
    async fn fetch_pending_executions(&self, limit: usize) -> StorageResult<Vec<ReportExecution>> {
        let rows = sqlx::query(
            r#"
            SELECT id, report_definition_id, schedule_id, triggered_by, triggered_at, status, parameters
            FROM report_executions
            WHERE status = 'pending'
            ORDER BY triggered_at ASC, rowid ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_rows(&rows, "report_executions", execution_from_row))
    }

    #[instrument(skip(self, error_message))]
    async fn update_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error_message: Option<String>,
    ) -> StorageResult<()> {
        let Some(expected) = status.predecessor() else {
            return Err(StorageError::InvalidTransition {
                id,
                from: None,
                to: status,
            });
        };

        let now = to_millis(&Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE report_executions SET
                status = ?,
                error_message = ?,
                started_at = CASE WHEN ? = 'processing' THEN ? ELSE started_at END,
                completed_at = CASE WHEN ? IN ('completed', 'failed') THEN ? ELSE completed_at END
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(status.as_str())
        .bind(now)
        .bind(status.as_str())
        .bind(now)
        .bind(id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // nothing updated: distinguish a missing row from a forbidden transition
        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM report_executions WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        match current {
            None => Err(StorageError::NotFound {
                table: "report_executions",
                id,
            }),
            Some((current,)) => Err(StorageError::InvalidTransition {
                id,
                from: current.parse().ok(),
                to: status,
            }),
        }
    }
}

#[async_trait]
impl AggregateStore for SqliteStore {
    #[instrument(skip(self))]
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

        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_key, aggregate_type, project_id, user_id, period_type,
                   data, is_stale, computed_at
            FROM dashboard_aggregates
            WHERE is_stale = 1 OR computed_at < ?
            ORDER BY computed_at ASC
            LIMIT ?
            "#,
        )
        .bind(to_millis(&cutoff))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_rows(&rows, "dashboard_aggregates", aggregate_from_row))
    }

    #[instrument(skip(self, data))]
    async fn update_aggregate(&self, id: Uuid, data: JsonMap) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE dashboard_aggregates SET
                data = ?,
                computed_at = ?,
                is_stale = 0
            WHERE id = ?
            "#,
        )
        .bind(serde_json::to_string(&data)?)
        .bind(to_millis(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                table: "dashboard_aggregates",
                id,
            });
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn dashboard_summary(
        &self,
        project_id: Option<Uuid>,
    ) -> StorageResult<DashboardSummary> {
        let base = r#"
            SELECT
                COUNT(*) AS total_projects,
                CAST(COALESCE(SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END), 0) AS INTEGER) AS active_projects,
                CAST(COALESCE(SUM(total_area_hectares), 0) AS REAL) AS total_area
            FROM projects
        "#;

        let row = match project_id {
            Some(project_id) => {
                let sql = format!("{base} WHERE id = ?");
                sqlx::query(&sql)
                    .bind(project_id.to_string())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => sqlx::query(base).fetch_one(&self.pool).await?,
        };

        Ok(DashboardSummary {
            total_projects: row.try_get("total_projects")?,
            active_projects: row.try_get("active_projects")?,
            total_area_hectares: row.try_get("total_area")?,
        })
    }

    #[instrument(skip(self))]
    async fn project_summary(&self, project_id: Uuid) -> StorageResult<ProjectSummary> {
        let row = sqlx::query(
            r#"
            SELECT
                p.name,
                p.status,
                p.total_area_hectares,
                CAST(COALESCE(SUM(c.issued_tons), 0) AS REAL) AS total_credits,
                COUNT(c.id) AS credit_count
            FROM projects p
            LEFT JOIN carbon_credits c ON c.project_id = p.id
            WHERE p.id = ?
            GROUP BY p.id
            "#,
        )
        .bind(project_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::NotFound {
            table: "projects",
            id: project_id,
        })?;

        Ok(ProjectSummary {
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            total_area_hectares: row.try_get("total_area_hectares")?,
            total_credits: row.try_get("total_credits")?,
            credit_count: row.try_get("credit_count")?,
        })
    }

    #[instrument(skip(self))]
    async fn credit_summary(&self, project_id: Option<Uuid>) -> StorageResult<CreditSummary> {
        let base = r#"
            SELECT
                CAST(COALESCE(SUM(calculated_tons), 0) AS REAL) AS total_calculated,
                CAST(COALESCE(SUM(issued_tons), 0) AS REAL) AS total_issued,
                CAST(COALESCE(AVG(data_quality_score), 0) AS REAL) AS avg_quality_score
            FROM carbon_credits
        "#;

        let row = match project_id {
            Some(project_id) => {
                let sql = format!("{base} WHERE project_id = ?");
                sqlx::query(&sql)
                    .bind(project_id.to_string())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => sqlx::query(base).fetch_one(&self.pool).await?,
        };

        Ok(CreditSummary {
            total_calculated: row.try_get("total_calculated")?,
            total_issued: row.try_get("total_issued")?,
            average_quality_score: row.try_get("avg_quality_score")?,
        })
    }

    #[instrument(skip(self))]
    async fn revenue_summary(&self, project_id: Option<Uuid>) -> StorageResult<RevenueSummary> {
        let base = r#"
            SELECT
                CAST(COALESCE(SUM(amount), 0) AS REAL) AS total_revenue,
                COUNT(*) AS transaction_count,
                CAST(COALESCE(AVG(amount), 0) AS REAL) AS average_amount
            FROM payment_transactions
            WHERE status = 'completed'
        "#;

        let row = match project_id {
            Some(project_id) => {
                let sql = format!("{base} AND project_id = ?");
                sqlx::query(&sql)
                    .bind(project_id.to_string())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => sqlx::query(base).fetch_one(&self.pool).await?,
        };

        Ok(RevenueSummary {
            total_revenue: row.try_get("total_revenue")?,
            transaction_count: row.try_get("transaction_count")?,
            average_amount: row.try_get("average_amount")?,
        })
    }
}

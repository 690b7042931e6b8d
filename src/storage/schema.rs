//! Record types exchanged with the store
//!
//! ## Ownership
//!
//! All records are owned by the store. Workers and the alert engine receive
//! copies: a claimed [`ReportExecution`] or [`StaleAggregate`] belongs to exactly
//! one handler for the duration of processing, and an [`AlertRule`] is never
//! mutated during an evaluation pass.
//!
//! ## Authoring format
//!
//! Alert rules keep the generic key/value document they were authored with
//! (`condition_type` + `condition_config`). The typed view lives in
//! [`crate::alerts::condition`] and is decoded once per evaluation pass.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Free-form JSON object used for parameters, details and aggregate payloads
pub type JsonMap = Map<String, Value>;

// ============================================================================
// Report executions
// ============================================================================

/// Lifecycle of a report execution
///
/// ```text
/// pending → processing → completed
///                      → failed
/// ```
///
/// Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    /// Whether a stored execution in `self` may move to `next`
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        matches!(
            (self, next),
            (ExecutionStatus::Pending, ExecutionStatus::Processing)
                | (ExecutionStatus::Processing, ExecutionStatus::Completed)
                | (ExecutionStatus::Processing, ExecutionStatus::Failed)
        )
    }

    /// The only status a row must currently have to accept `self`
    pub fn predecessor(self) -> Option<ExecutionStatus> {
        match self {
            ExecutionStatus::Pending => None,
            ExecutionStatus::Processing => Some(ExecutionStatus::Pending),
            ExecutionStatus::Completed | ExecutionStatus::Failed => {
                Some(ExecutionStatus::Processing)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Processing => "processing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "processing" => Ok(ExecutionStatus::Processing),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// A queued run of a report definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportExecution {
    pub id: Uuid,

    /// Report definition this execution renders
    pub report_definition_id: Uuid,

    /// Schedule that created the execution, if any
    pub schedule_id: Option<Uuid>,

    /// User who triggered the execution, if any
    pub triggered_by: Option<Uuid>,

    pub triggered_at: DateTime<Utc>,

    pub status: ExecutionStatus,

    /// Arbitrary report parameters
    #[serde(default)]
    pub parameters: JsonMap,
}

impl ReportExecution {
    /// A new pending execution triggered now
    pub fn pending(report_definition_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            report_definition_id,
            schedule_id: None,
            triggered_by: None,
            triggered_at: Utc::now(),
            status: ExecutionStatus::Pending,
            parameters: JsonMap::new(),
        }
    }
}

/// An execution as the store holds it, with the bookkeeping columns the
/// worker's status updates maintain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution: ReportExecution,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Dashboard aggregates
// ============================================================================

/// Kind of cached aggregate
///
/// Types this worker does not know yet are kept verbatim in
/// [`AggregateType::Unknown`] so newer rows never fail to load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AggregateType {
    DashboardSummary,
    ProjectSummary,
    CreditSummary,
    RevenueSummary,
    Unknown(String),
}

impl AggregateType {
    pub fn as_str(&self) -> &str {
        match self {
            AggregateType::DashboardSummary => "dashboard_summary",
            AggregateType::ProjectSummary => "project_summary",
            AggregateType::CreditSummary => "credit_summary",
            AggregateType::RevenueSummary => "revenue_summary",
            AggregateType::Unknown(other) => other,
        }
    }
}

impl From<String> for AggregateType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "dashboard_summary" => AggregateType::DashboardSummary,
            "project_summary" => AggregateType::ProjectSummary,
            "credit_summary" => AggregateType::CreditSummary,
            "revenue_summary" => AggregateType::RevenueSummary,
            _ => AggregateType::Unknown(value),
        }
    }
}

impl From<&str> for AggregateType {
    fn from(value: &str) -> Self {
        AggregateType::from(value.to_string())
    }
}

impl From<AggregateType> for String {
    fn from(value: AggregateType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached dashboard aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleAggregate {
    pub id: Uuid,

    /// Cache key (e.g. `"dashboard:project:<id>:daily"`)
    pub aggregate_key: String,

    pub aggregate_type: AggregateType,

    pub project_id: Option<Uuid>,

    pub user_id: Option<Uuid>,

    /// Period the aggregate covers (`daily`, `monthly`, ...)
    pub period_type: String,

    pub is_stale: bool,

    pub computed_at: DateTime<Utc>,

    /// Last computed payload
    #[serde(default)]
    pub data: JsonMap,
}

impl StaleAggregate {
    /// A new aggregate flagged stale, never computed
    pub fn new(
        aggregate_key: impl Into<String>,
        aggregate_type: AggregateType,
        project_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_key: aggregate_key.into(),
            aggregate_type,
            project_id,
            user_id: None,
            period_type: "daily".to_string(),
            is_stale: true,
            computed_at: DateTime::UNIX_EPOCH,
            data: JsonMap::new(),
        }
    }
}

/// Portfolio-level project counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub total_projects: i64,
    pub active_projects: i64,
    pub total_area_hectares: f64,
}

/// Single project overview with its credit totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: String,
    pub status: String,
    pub total_area_hectares: f64,
    pub total_credits: f64,
    pub credit_count: i64,
}

/// Carbon credit totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditSummary {
    pub total_calculated: f64,
    pub total_issued: f64,
    pub average_quality_score: f64,
}

/// Completed payment totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevenueSummary {
    pub total_revenue: f64,
    pub transaction_count: i64,
    pub average_amount: f64,
}

// ============================================================================
// Alert rules and alerts
// ============================================================================

/// Where a rule reads its metric from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSource {
    /// IoT sensor readings
    Sensor,

    /// Satellite observations (vegetation / biomass indices)
    Satellite,

    /// Derived project metrics
    Calculated,
}

impl MetricSource {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricSource::Sensor => "sensor",
            MetricSource::Satellite => "satellite",
            MetricSource::Calculated => "calculated",
        }
    }
}

impl fmt::Display for MetricSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sensor" => Ok(MetricSource::Sensor),
            "satellite" => Ok(MetricSource::Satellite),
            "calculated" => Ok(MetricSource::Calculated),
            other => Err(format!("unknown metric source: {other}")),
        }
    }
}

/// A user-defined monitoring rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,

    /// Project scope (`None` = applies to every project)
    pub project_id: Option<Uuid>,

    pub name: String,

    pub description: Option<String>,

    /// `threshold`, `rate_of_change`, `data_gap` or `anomaly`
    pub condition_type: String,

    pub metric_source: MetricSource,

    pub metric_name: String,

    /// Required when `metric_source` is `sensor`
    pub sensor_type: Option<String>,

    /// Condition parameters, keys depend on `condition_type`
    #[serde(default)]
    pub condition_config: Value,

    pub severity: String,

    #[serde(default)]
    pub notification_channels: Vec<String>,

    pub cooldown_minutes: u32,

    pub is_active: bool,
}

/// Lifecycle of a triggered alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AlertStatus::Active),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(format!("unknown alert status: {other}")),
        }
    }
}

/// A triggered alert, created once per trigger event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,

    /// Rule that fired (nullable so alerts survive rule deletion)
    pub rule_id: Option<Uuid>,

    pub project_id: Uuid,

    pub trigger_time: DateTime<Utc>,

    pub resolved_time: Option<DateTime<Utc>>,

    pub severity: String,

    pub title: String,

    pub message: String,

    /// Snapshot of the values the evaluation used
    #[serde(default)]
    pub details: JsonMap,

    pub status: AlertStatus,

    pub notification_sent: bool,

    pub notification_attempts: u32,
}

// ============================================================================
// Metric samples
// ============================================================================

/// One IoT sensor measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub time: DateTime<Utc>,
    pub project_id: Uuid,
    pub sensor_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub battery_level: Option<f64>,
}

/// One satellite observation of a project area
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SatelliteObservation {
    pub time: DateTime<Utc>,
    pub project_id: Uuid,
    pub satellite_source: String,
    pub tile_id: Option<String>,
    pub ndvi: Option<f64>,
    pub evi: Option<f64>,
    pub ndwi: Option<f64>,
    pub savi: Option<f64>,
    pub biomass_kg_per_ha: Option<f64>,
    pub cloud_coverage_percent: Option<f64>,
}

impl SatelliteObservation {
    /// Look up a named index on the observation
    pub fn index(&self, metric_name: &str) -> Option<f64> {
        match metric_name {
            "ndvi" => self.ndvi,
            "evi" => self.evi,
            "ndwi" => self.ndwi,
            "savi" => self.savi,
            "biomass" | "biomass_kg_per_ha" => self.biomass_kg_per_ha,
            "cloud_coverage" | "cloud_coverage_percent" => self.cloud_coverage_percent,
            _ => None,
        }
    }
}

/// A derived project metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetric {
    pub time: DateTime<Utc>,
    pub project_id: Uuid,
    pub metric_name: String,
    pub value: f64,

    /// `raw`, `daily`, `monthly`, ...
    pub aggregation_period: String,

    pub unit: Option<String>,
}

/// Timestamped scalar, the common view the evaluators work on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    pub time: DateTime<Utc>,
    pub value: f64,
}

impl From<&SensorReading> for MetricSample {
    fn from(reading: &SensorReading) -> Self {
        Self {
            time: reading.time,
            value: reading.value,
        }
    }
}

impl From<&ProjectMetric> for MetricSample {
    fn from(metric: &ProjectMetric) -> Self {
        Self {
            time: metric.time,
            value: metric.value,
        }
    }
}

// ============================================================================
// Summary source rows
// ============================================================================

/// Project row read by the summary queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub total_area_hectares: f64,
}

/// Carbon credit row read by the summary queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub calculated_tons: f64,
    pub issued_tons: f64,
    pub data_quality_score: Option<f64>,
}

/// Payment transaction row read by the summary queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub amount: f64,
    pub status: String,
}

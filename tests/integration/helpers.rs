//! Helper functions for integration tests

use chrono::{DateTime, Utc};
use portal_monitoring::storage::schema::{
    AlertRule, MetricSource, ProjectMetric, SensorReading,
};
use serde_json::Value;
use uuid::Uuid;

pub fn create_test_rule(
    project_id: Option<Uuid>,
    condition_type: &str,
    metric_source: MetricSource,
    config: Value,
) -> AlertRule {
    AlertRule {
        id: Uuid::new_v4(),
        project_id,
        name: format!("{condition_type} rule"),
        description: None,
        condition_type: condition_type.to_string(),
        metric_source,
        metric_name: "carbon_stock".to_string(),
        sensor_type: Some("soil_moisture".to_string()),
        condition_config: config,
        severity: "warning".to_string(),
        notification_channels: vec!["webhook".to_string()],
        cooldown_minutes: 30,
        is_active: true,
    }
}

pub fn create_metric(
    project_id: Uuid,
    time: DateTime<Utc>,
    value: f64,
    aggregation_period: &str,
) -> ProjectMetric {
    ProjectMetric {
        time,
        project_id,
        metric_name: "carbon_stock".to_string(),
        value,
        aggregation_period: aggregation_period.to_string(),
        unit: Some("tCO2e".to_string()),
    }
}

pub fn create_reading(project_id: Uuid, time: DateTime<Utc>, value: f64) -> SensorReading {
    SensorReading {
        time,
        project_id,
        sensor_id: "probe-7".to_string(),
        sensor_type: "soil_moisture".to_string(),
        value,
        unit: "%".to_string(),
        latitude: Some(-3.12),
        longitude: Some(-60.02),
        battery_level: Some(87.0),
    }
}

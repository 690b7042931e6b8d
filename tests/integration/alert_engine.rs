//! End-to-end evaluation passes against the in-memory store
//!
//! - Cooldown suppression across passes
//! - Rule failures isolated from sibling rules
//! - Full notification queue never blocks a pass
//! - Store failures while loading rules surface to the caller

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use portal_monitoring::alerts::AlertEngine;
use portal_monitoring::config::AlertEngineConfig;
use portal_monitoring::storage::schema::{
    Alert, AlertRule, AlertStatus, MetricSource, ProjectMetric, SatelliteObservation,
    SensorReading,
};
use portal_monitoring::storage::{AlertStore, MemoryStore, StorageError, StorageResult};
use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;

use super::helpers::*;

fn engine(store: Arc<MemoryStore>, queue_capacity: usize) -> AlertEngine {
    let config = AlertEngineConfig {
        queue_capacity,
        ..Default::default()
    };
    AlertEngine::new(store, &config)
}

#[tokio::test]
async fn test_cooldown_suppresses_until_window_passes() {
    let store = Arc::new(MemoryStore::new());
    let project = Uuid::new_v4();
    store
        .insert_metric(create_metric(project, Utc::now(), 150.0, "daily"))
        .await;

    let rule = create_test_rule(
        Some(project),
        "threshold",
        MetricSource::Calculated,
        json!({"threshold": 100.0}),
    );
    store.insert_rule(rule.clone()).await;

    // an alert 10 minutes ago is inside the 30 minute cooldown
    store
        .insert_alert(Alert {
            id: Uuid::new_v4(),
            rule_id: Some(rule.id),
            project_id: project,
            trigger_time: Utc::now() - TimeDelta::minutes(10),
            resolved_time: None,
            severity: rule.severity.clone(),
            title: rule.name.clone(),
            message: "earlier".to_string(),
            details: Default::default(),
            status: AlertStatus::Active,
            notification_sent: true,
            notification_attempts: 1,
        })
        .await;

    let engine = engine(store.clone(), 10);
    let summary = engine.evaluate_rules(project).await.unwrap();

    assert_eq!(summary.cooling_down, 1);
    assert_eq!(store.alerts().await.len(), 1);
    assert!(engine.notification_queue().try_recv().await.is_none());

    // the same rule on another project is not cooling down
    let other = Uuid::new_v4();
    store
        .insert_metric(create_metric(other, Utc::now(), 150.0, "daily"))
        .await;
    let mut global = rule.clone();
    global.id = Uuid::new_v4();
    global.project_id = None;
    store.insert_rule(global).await;

    let summary = engine.evaluate_rules(other).await.unwrap();
    assert_eq!(summary.triggered, 1);
}

#[tokio::test]
async fn test_mixed_rules_in_one_pass() {
    let store = Arc::new(MemoryStore::new());
    let project = Uuid::new_v4();
    let now = Utc::now();

    store
        .insert_metric(create_metric(project, now - TimeDelta::minutes(40), 100.0, "raw"))
        .await;
    store
        .insert_metric(create_metric(project, now - TimeDelta::minutes(1), 130.0, "raw"))
        .await;
    store
        .insert_sensor_reading(create_reading(project, now - TimeDelta::hours(3), 30.0))
        .await;

    let rules = [
        // triggers: +30% over the window
        create_test_rule(
            Some(project),
            "rate_of_change",
            MetricSource::Calculated,
            json!({"max_rate": 20.0}),
        ),
        // triggers: last reading 3 hours ago
        create_test_rule(
            Some(project),
            "data_gap",
            MetricSource::Sensor,
            json!({"max_gap_minutes": 60}),
        ),
        // never triggers
        create_test_rule(Some(project), "anomaly", MetricSource::Sensor, json!({})),
        // configuration error: unsupported source
        create_test_rule(
            Some(project),
            "data_gap",
            MetricSource::Calculated,
            json!({"max_gap_minutes": 60}),
        ),
        // configuration error: unknown condition type
        create_test_rule(Some(project), "forecast", MetricSource::Calculated, json!({})),
    ];
    for rule in &rules {
        store.insert_rule(rule.clone()).await;
    }

    let engine = engine(store.clone(), 10);
    let summary = engine.evaluate_rules(project).await.unwrap();

    assert_eq!(summary.rules, 5);
    assert_eq!(summary.triggered, 2);
    assert_eq!(summary.failed, 2);

    let mut messages: Vec<String> = store.alerts().await.into_iter().map(|a| a.message).collect();
    messages.sort();
    assert_eq!(
        messages,
        vec![
            "data_gap rule: Data gap detected - no recent data for carbon_stock".to_string(),
            "rate_of_change rule: Rapid change detected in carbon_stock".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_full_queue_does_not_block_evaluation() {
    let store = Arc::new(MemoryStore::new());
    let project = Uuid::new_v4();
    store
        .insert_metric(create_metric(project, Utc::now(), 150.0, "daily"))
        .await;
    for _ in 0..3 {
        store
            .insert_rule(create_test_rule(
                Some(project),
                "threshold",
                MetricSource::Calculated,
                json!({"threshold": 100.0}),
            ))
            .await;
    }

    let engine = engine(store.clone(), 1);
    let summary = tokio::time::timeout(Duration::from_secs(1), engine.evaluate_rules(project))
        .await
        .expect("evaluation must not wait for queue space")
        .unwrap();

    assert_eq!(summary.triggered, 3);
    assert_eq!(summary.dropped_notifications, 2);
    // every alert is persisted even when its notification was dropped
    assert_eq!(store.alerts().await.len(), 3);
}

#[tokio::test]
async fn test_satellite_threshold_uses_configured_source() {
    let store = Arc::new(MemoryStore::new());
    let project = Uuid::new_v4();
    store
        .insert_satellite_observation(SatelliteObservation {
            time: Utc::now() - TimeDelta::days(1),
            project_id: project,
            satellite_source: "landsat8".to_string(),
            biomass_kg_per_ha: Some(900.0),
            ..Default::default()
        })
        .await;

    let mut rule = create_test_rule(
        Some(project),
        "threshold",
        MetricSource::Satellite,
        json!({"threshold": 1000.0, "operator": "less_than"}),
    );
    rule.metric_name = "biomass".to_string();
    store.insert_rule(rule).await;

    // default source sees no observation
    let default_engine = engine(store.clone(), 10);
    let summary = default_engine.evaluate_rules(project).await.unwrap();
    assert_eq!(summary.triggered, 0);

    let config = AlertEngineConfig {
        satellite_source: "landsat8".to_string(),
        ..Default::default()
    };
    let landsat_engine = AlertEngine::new(store.clone(), &config);
    let summary = landsat_engine.evaluate_rules(project).await.unwrap();
    assert_eq!(summary.triggered, 1);
}

/// Store whose rule lookup always fails
struct UnreachableRules(MemoryStore);

#[async_trait]
impl AlertStore for UnreachableRules {
    async fn fetch_active_rules(&self, _project_id: Option<Uuid>) -> StorageResult<Vec<AlertRule>> {
        Err(StorageError::ConnectionFailed("connection refused".to_string()))
    }

    async fn check_cooldown(&self, rule_id: Uuid, project_id: Uuid, minutes: u32) -> StorageResult<bool> {
        self.0.check_cooldown(rule_id, project_id, minutes).await
    }

    async fn create_alert(&self, alert: &Alert) -> StorageResult<()> {
        self.0.create_alert(alert).await
    }

    async fn record_notification_attempt(&self, alert_id: Uuid, sent: bool) -> StorageResult<()> {
        self.0.record_notification_attempt(alert_id, sent).await
    }

    async fn fetch_sensor_readings(
        &self,
        project_id: Uuid,
        sensor_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<SensorReading>> {
        self.0
            .fetch_sensor_readings(project_id, sensor_type, start, end)
            .await
    }

    async fn fetch_latest_satellite_observation(
        &self,
        project_id: Uuid,
        satellite_source: &str,
    ) -> StorageResult<Option<SatelliteObservation>> {
        self.0
            .fetch_latest_satellite_observation(project_id, satellite_source)
            .await
    }

    async fn fetch_latest_metric(
        &self,
        project_id: Uuid,
        metric_name: &str,
        aggregation_period: &str,
    ) -> StorageResult<Option<ProjectMetric>> {
        self.0
            .fetch_latest_metric(project_id, metric_name, aggregation_period)
            .await
    }

    async fn fetch_metric_series(
        &self,
        project_id: Uuid,
        metric_name: &str,
        aggregation_period: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<ProjectMetric>> {
        self.0
            .fetch_metric_series(project_id, metric_name, aggregation_period, start, end)
            .await
    }
}

#[tokio::test]
async fn test_rule_lookup_failure_is_returned() {
    let store = Arc::new(UnreachableRules(MemoryStore::new()));
    let engine = AlertEngine::new(store, &AlertEngineConfig::default());

    let result = engine.evaluate_rules(Uuid::new_v4()).await;
    assert!(matches!(result, Err(StorageError::ConnectionFailed(_))));
}

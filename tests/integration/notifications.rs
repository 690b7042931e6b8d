//! Webhook delivery of queued alerts

use std::sync::Arc;

use chrono::Utc;
use portal_monitoring::alerts::AlertEngine;
use portal_monitoring::config::{AlertEngineConfig, Webhook};
use portal_monitoring::notify::{NotificationDispatcher, Notifier, WebhookNotifier};
use portal_monitoring::storage::MemoryStore;
use portal_monitoring::storage::schema::MetricSource;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::helpers::*;

async fn engine_with_alert(store: &Arc<MemoryStore>) -> (AlertEngine, Uuid) {
    let project = Uuid::new_v4();
    store
        .insert_metric(create_metric(project, Utc::now(), 150.0, "daily"))
        .await;
    store
        .insert_rule(create_test_rule(
            Some(project),
            "threshold",
            MetricSource::Calculated,
            json!({"threshold": 100.0}),
        ))
        .await;

    let engine = AlertEngine::new(store.clone(), &AlertEngineConfig::default());
    engine.evaluate_rules(project).await.unwrap();
    (engine, project)
}

#[tokio::test]
async fn test_webhook_receives_alert_payload() {
    let mock_server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let (engine, project) = engine_with_alert(&store).await;

    Mock::given(method("POST"))
        .and(path("/hooks/alerts"))
        .and(body_partial_json(json!({
            "project_id": project,
            "severity": "warning",
            "title": "threshold rule",
            "message": "threshold rule: Threshold breach detected for carbon_stock",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let notifier: Arc<dyn Notifier> = Arc::new(
        WebhookNotifier::new(Webhook {
            url: format!("{}/hooks/alerts", mock_server.uri()),
        })
        .unwrap(),
    );
    let dispatcher = NotificationDispatcher::new(engine.notification_queue(), notifier, store.clone());

    let alert = engine.notification_queue().try_recv().await.unwrap();
    assert!(dispatcher.dispatch(&alert).await);

    let stored = &store.alerts().await[0];
    assert!(stored.notification_sent);
    assert_eq!(stored.notification_attempts, 1);
}

#[tokio::test]
async fn test_webhook_error_status_is_recorded_as_failed_attempt() {
    let mock_server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let (engine, _) = engine_with_alert(&store).await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let notifier: Arc<dyn Notifier> = Arc::new(
        WebhookNotifier::new(Webhook {
            url: mock_server.uri(),
        })
        .unwrap(),
    );
    let dispatcher = NotificationDispatcher::new(engine.notification_queue(), notifier, store.clone());

    let alert = engine.notification_queue().try_recv().await.unwrap();
    assert!(!dispatcher.dispatch(&alert).await);

    let stored = &store.alerts().await[0];
    assert!(!stored.notification_sent);
    assert_eq!(stored.notification_attempts, 1);
}

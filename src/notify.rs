//! Notification delivery for queued alerts
//!
//! The [`NotificationDispatcher`] drains the engine's notification queue,
//! hands every alert to a [`Notifier`] and records the attempt in the store.
//! Delivery is attempted once; a failed attempt is recorded with
//! `notification_sent = false` and not retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, info, instrument};

use crate::alerts::NotificationReceiver;
use crate::config::Webhook;
use crate::shutdown::Shutdown;
use crate::storage::AlertStore;
use crate::storage::schema::Alert;

/// Delivers one alert to its audience
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// POSTs alerts as JSON to a webhook URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook: Webhook,
}

impl WebhookNotifier {
    pub fn new(webhook: Webhook) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, webhook })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    #[instrument(skip_all, fields(alert_id = %alert.id))]
    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        let payload = json!({
            "id": alert.id,
            "rule_id": alert.rule_id,
            "project_id": alert.project_id,
            "severity": alert.severity,
            "title": alert.title,
            "message": alert.message,
            "details": alert.details,
            "trigger_time": alert.trigger_time.to_rfc3339(),
        });

        let response = self
            .client
            .post(&self.webhook.url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("webhook responded with status {}", response.status());
        }

        debug!("webhook accepted alert");
        Ok(())
    }
}

/// Writes alerts to the log only
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        info!(
            "[{}] {} (project {})",
            alert.severity, alert.message, alert.project_id
        );
        Ok(())
    }
}

pub struct NotificationDispatcher {
    receiver: NotificationReceiver,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn AlertStore>,
}

impl NotificationDispatcher {
    pub fn new(
        receiver: NotificationReceiver,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn AlertStore>,
    ) -> Self {
        Self {
            receiver,
            notifier,
            store,
        }
    }

    /// Deliver queued alerts until `shutdown` is requested or the queue closes
    #[instrument(skip_all, fields(notifier = self.notifier.name()))]
    pub async fn run(&self, shutdown: &Shutdown) {
        debug!("starting notification dispatcher");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.wait() => break,

                alert = self.receiver.recv() => match alert {
                    Some(alert) => {
                        self.dispatch(&alert).await;
                    }
                    None => {
                        debug!("notification queue closed");
                        break;
                    }
                },
            }
        }

        debug!("notification dispatcher stopped");
    }

    /// Deliver one alert and record the attempt; returns whether it was sent
    pub async fn dispatch(&self, alert: &Alert) -> bool {
        let sent = match self.notifier.deliver(alert).await {
            Ok(()) => true,
            Err(e) => {
                error!("failed to deliver alert {}: {:#}", alert.id, e);
                false
            }
        };

        if let Err(e) = self.store.record_notification_attempt(alert.id, sent).await {
            error!("failed to record notification attempt for {}: {}", alert.id, e);
        }

        sent
    }
}

//! Alert rule evaluation engine
//!
//! [`AlertEngine::evaluate_rules`] runs one evaluation pass for a project:
//!
//! 1. load the project's active rules (global rules included)
//! 2. skip rules whose last alert for the project is within their cooldown
//! 3. decode and evaluate each remaining rule's condition
//! 4. persist an [`Alert`] for every triggered rule and offer it to the
//!    notification queue
//!
//! A failing rule is logged and skipped; it never affects its siblings.
//! Passes for different projects share nothing but the queue, so they can
//! run concurrently.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AlertEngineConfig;
use crate::storage::schema::{Alert, AlertRule, AlertStatus};
use crate::storage::{AlertStore, StorageResult};

use super::condition::EvaluationError;
use super::evaluator::{Evaluation, Evaluator};
use super::queue::{NotificationQueue, NotificationReceiver};

/// What happened to one rule during a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    /// Skipped because of the cooldown
    CoolingDown,

    /// Evaluated, condition did not hold
    NotTriggered,

    /// Alert persisted; `queued` is false when the queue was full
    Triggered { queued: bool },

    /// Cooldown check, evaluation or alert creation failed
    Failed,
}

/// Per-pass outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub rules: usize,
    pub cooling_down: usize,
    pub triggered: usize,
    pub dropped_notifications: usize,
    pub failed: usize,
}

impl EvaluationSummary {
    fn record(&mut self, outcome: RuleOutcome) {
        self.rules += 1;
        match outcome {
            RuleOutcome::CoolingDown => self.cooling_down += 1,
            RuleOutcome::NotTriggered => {}
            RuleOutcome::Triggered { queued } => {
                self.triggered += 1;
                if !queued {
                    self.dropped_notifications += 1;
                }
            }
            RuleOutcome::Failed => self.failed += 1,
        }
    }
}

pub struct AlertEngine {
    store: Arc<dyn AlertStore>,
    queue: NotificationQueue,
    satellite_source: String,
}

impl AlertEngine {
    pub fn new(store: Arc<dyn AlertStore>, config: &AlertEngineConfig) -> Self {
        Self {
            store,
            queue: NotificationQueue::new(config.queue_capacity),
            satellite_source: config.satellite_source.clone(),
        }
    }

    /// Consumer handle of the notification queue
    pub fn notification_queue(&self) -> NotificationReceiver {
        self.queue.receiver()
    }

    /// Run one evaluation pass for `project_id`
    ///
    /// Only a failure to load the rules is returned; every per-rule problem
    /// is logged and reflected in the summary.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn evaluate_rules(&self, project_id: Uuid) -> StorageResult<EvaluationSummary> {
        let rules = self.store.fetch_active_rules(Some(project_id)).await?;

        debug!("evaluating {} active rules", rules.len());

        let mut summary = EvaluationSummary::default();
        for rule in &rules {
            let outcome = self.evaluate_rule(rule, project_id).await;
            summary.record(outcome);
        }

        if summary.triggered > 0 {
            info!(
                "{} of {} rules triggered ({} cooling down, {} failed)",
                summary.triggered, summary.rules, summary.cooling_down, summary.failed
            );
        }

        Ok(summary)
    }

    #[instrument(skip_all, fields(rule_id = %rule.id, condition_type = %rule.condition_type))]
    async fn evaluate_rule(&self, rule: &AlertRule, project_id: Uuid) -> RuleOutcome {
        match self
            .store
            .check_cooldown(rule.id, project_id, rule.cooldown_minutes)
            .await
        {
            Ok(true) => {
                debug!("rule is cooling down");
                return RuleOutcome::CoolingDown;
            }
            Ok(false) => {}
            Err(e) => {
                error!("failed to check cooldown: {}", e);
                return RuleOutcome::Failed;
            }
        }

        let condition = match rule.condition() {
            Ok(condition) => condition,
            Err(e) => {
                warn!("skipping rule '{}': {}", rule.name, e);
                return RuleOutcome::Failed;
            }
        };

        let now = Utc::now();
        let evaluator = Evaluator::new(self.store.as_ref(), &self.satellite_source);

        let Evaluation { triggered, details } =
            match evaluator.evaluate(rule, &condition, project_id, now).await {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    log_evaluation_error(rule, &e);
                    return RuleOutcome::Failed;
                }
            };

        if !triggered {
            return RuleOutcome::NotTriggered;
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            rule_id: Some(rule.id),
            project_id,
            trigger_time: now,
            resolved_time: None,
            severity: rule.severity.clone(),
            title: rule.name.clone(),
            message: condition.alert_message(&rule.name, &rule.metric_name),
            details,
            status: AlertStatus::Active,
            notification_sent: false,
            notification_attempts: 0,
        };

        if let Err(e) = self.store.create_alert(&alert).await {
            error!("failed to create alert: {}", e);
            return RuleOutcome::Failed;
        }

        info!("alert {} triggered: {}", alert.id, alert.message);

        let queued = self.queue.try_enqueue(alert);
        RuleOutcome::Triggered { queued }
    }
}

fn log_evaluation_error(rule: &AlertRule, err: &EvaluationError) {
    match err {
        EvaluationError::Storage(_) => error!("failed to evaluate rule '{}': {}", rule.name, err),
        _ if err.is_data_insufficiency() => {
            debug!("rule '{}' not evaluated: {}", rule.name, err)
        }
        _ => warn!("skipping rule '{}': {}", rule.name, err),
    }
}

//! Aggregation refresh worker
//!
//! Recomputes cached dashboard aggregates that are flagged stale or older
//! than the stale threshold. Each aggregate type maps to one read-only
//! summary query; the typed result is flattened into the aggregate's JSON
//! payload.
//!
//! Aggregate types this worker doesn't know are skipped with a warning and
//! stay stale. A failed computation also leaves the aggregate stale, so it
//! is picked up again on a later tick.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, instrument, warn};

use crate::config::AggregationWorkerConfig;
use crate::polling::{PollSource, PollingWorker};
use crate::storage::schema::{AggregateType, JsonMap, StaleAggregate};
use crate::storage::{AggregateStore, StorageError, StorageResult};

/// Why an aggregate could not be recomputed
#[derive(Debug)]
pub enum RefreshError {
    /// The aggregate type needs a project scope the row doesn't carry
    MissingProject(AggregateType),

    Storage(StorageError),
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshError::MissingProject(kind) => write!(f, "{} requires a project id", kind),
            RefreshError::Storage(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for RefreshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RefreshError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for RefreshError {
    fn from(err: StorageError) -> Self {
        RefreshError::Storage(err)
    }
}

/// Refreshes stale aggregates for a [`PollingWorker`]
pub struct AggregationProcessor {
    store: Arc<dyn AggregateStore>,
    stale_threshold: Duration,
}

pub type AggregationWorker = PollingWorker<AggregationProcessor>;

impl AggregationProcessor {
    pub fn new(store: Arc<dyn AggregateStore>, stale_threshold: Duration) -> Self {
        Self {
            store,
            stale_threshold,
        }
    }

    pub fn into_worker(self, config: &AggregationWorkerConfig) -> AggregationWorker {
        PollingWorker::new(self, config.polling())
    }

    /// Compute the payload for one aggregate
    ///
    /// `Ok(None)` means the type is unknown and the aggregate is skipped.
    pub async fn compute(&self, aggregate: &StaleAggregate) -> Result<Option<JsonMap>, RefreshError> {
        let project = aggregate.project_id;

        let data = match &aggregate.aggregate_type {
            AggregateType::DashboardSummary => flatten(&self.store.dashboard_summary(project).await?)?,
            AggregateType::ProjectSummary => {
                let project = project.ok_or(RefreshError::MissingProject(
                    AggregateType::ProjectSummary,
                ))?;
                flatten(&self.store.project_summary(project).await?)?
            }
            AggregateType::CreditSummary => flatten(&self.store.credit_summary(project).await?)?,
            AggregateType::RevenueSummary => flatten(&self.store.revenue_summary(project).await?)?,
            AggregateType::Unknown(kind) => {
                warn!(
                    "unknown aggregate type {} left stale; it keeps a slot in every oldest-first batch",
                    kind
                );
                return Ok(None);
            }
        };

        Ok(Some(data))
    }

    #[instrument(skip_all, fields(aggregate_key = %aggregate.aggregate_key, aggregate_type = %aggregate.aggregate_type))]
    pub async fn refresh(&self, aggregate: StaleAggregate) {
        debug!("refreshing aggregate");

        let data = match self.compute(&aggregate).await {
            Ok(Some(data)) => data,
            Ok(None) => return,
            Err(e) => {
                error!("failed to compute aggregate: {}", e);
                return;
            }
        };

        if let Err(e) = self.store.update_aggregate(aggregate.id, data).await {
            error!("failed to update aggregate: {}", e);
            return;
        }

        debug!("aggregate refreshed");
    }
}

/// Flatten a typed summary into a key/value payload
fn flatten<T: Serialize>(summary: &T) -> StorageResult<JsonMap> {
    match serde_json::to_value(summary)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(StorageError::SerializationError(format!(
            "summary is not an object: {other}"
        ))),
    }
}

#[async_trait]
impl PollSource for AggregationProcessor {
    type Item = StaleAggregate;

    fn name(&self) -> &'static str {
        "stale aggregates"
    }

    async fn fetch(&self, limit: usize) -> StorageResult<Vec<StaleAggregate>> {
        self.store
            .fetch_stale_aggregates(self.stale_threshold, limit)
            .await
    }

    async fn process(&self, item: StaleAggregate) {
        self.refresh(item).await
    }
}

//! Report execution worker
//!
//! Drives pending report executions through
//! `pending → processing → {completed, failed}`:
//!
//! 1. mark the execution `processing` (persisted before any work starts, so a
//!    crash leaves it visibly stuck instead of silently lost)
//! 2. run the [`ReportExecutor`] under the execution timeout
//! 3. mark it `completed`, or `failed` with the error message verbatim
//!
//! Failed executions are terminal; they are never retried here.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{error, info, instrument};

use crate::config::ReportWorkerConfig;
use crate::polling::{PollSource, PollingWorker};
use crate::storage::schema::{ExecutionStatus, ReportExecution};
use crate::storage::{ReportStore, StorageResult};

/// Why a report body did not produce a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
    /// The executor reported a failure
    Failed(String),

    /// The executor did not finish within the execution timeout
    TimedOut(Duration),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::Failed(msg) => f.write_str(msg),
            ReportError::TimedOut(timeout) => {
                write!(f, "execution timed out after {:?}", timeout)
            }
        }
    }
}

impl std::error::Error for ReportError {}

/// Renders the report for one execution
#[async_trait]
pub trait ReportExecutor: Send + Sync + 'static {
    async fn execute(&self, execution: &ReportExecution) -> Result<(), ReportError>;
}

/// Stand-in executor that only takes time
#[derive(Debug, Clone)]
pub struct SimulatedReportExecutor {
    duration: Duration,
}

impl SimulatedReportExecutor {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Default for SimulatedReportExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl ReportExecutor for SimulatedReportExecutor {
    async fn execute(&self, _execution: &ReportExecution) -> Result<(), ReportError> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// Processes pending report executions for a [`PollingWorker`]
pub struct ReportProcessor {
    store: Arc<dyn ReportStore>,
    executor: Arc<dyn ReportExecutor>,
    execution_timeout: Duration,
}

pub type ReportWorker = PollingWorker<ReportProcessor>;

impl ReportProcessor {
    pub fn new(
        store: Arc<dyn ReportStore>,
        executor: Arc<dyn ReportExecutor>,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            execution_timeout,
        }
    }

    /// Build the polling worker described by `config`
    pub fn into_worker(self, config: &ReportWorkerConfig) -> ReportWorker {
        PollingWorker::new(self, config.polling())
    }

    #[instrument(skip_all, fields(execution_id = %execution.id, report_id = %execution.report_definition_id))]
    pub async fn process_execution(&self, execution: ReportExecution) {
        info!("processing report execution");

        let started = Instant::now();

        if let Err(e) = self
            .store
            .update_execution_status(execution.id, ExecutionStatus::Processing, None)
            .await
        {
            error!("failed to mark execution processing: {}", e);
            return;
        }

        let outcome =
            match tokio::time::timeout(self.execution_timeout, self.executor.execute(&execution))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ReportError::TimedOut(self.execution_timeout)),
            };

        let elapsed = started.elapsed();

        let (status, message) = match outcome {
            Ok(()) => {
                info!("report execution completed in {:?}", elapsed);
                (ExecutionStatus::Completed, None)
            }
            Err(e) => {
                error!("report execution failed after {:?}: {}", elapsed, e);
                (ExecutionStatus::Failed, Some(e.to_string()))
            }
        };

        if let Err(e) = self
            .store
            .update_execution_status(execution.id, status, message)
            .await
        {
            error!("failed to record {} status: {}", status, e);
        }
    }
}

#[async_trait]
impl PollSource for ReportProcessor {
    type Item = ReportExecution;

    fn name(&self) -> &'static str {
        "report executions"
    }

    async fn fetch(&self, limit: usize) -> StorageResult<Vec<ReportExecution>> {
        self.store.fetch_pending_executions(limit).await
    }

    async fn process(&self, item: ReportExecution) {
        self.process_execution(item).await
    }
}

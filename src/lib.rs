//! Background monitoring services for the project portal
//!
//! - [`alerts`]: rule evaluation engine and notification queue
//! - [`workers`]: report execution and aggregation refresh workers
//! - [`polling`] / [`dispatch`]: the timer-driven loop and bounded dispatcher
//!   both workers are built on
//! - [`storage`]: store traits with in-memory and SQLite backends

pub mod alerts;
pub mod config;
pub mod dispatch;
pub mod notify;
pub mod polling;
pub mod shutdown;
pub mod storage;
pub mod util;
pub mod workers;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::StorageConfig;
use crate::storage::{AggregateStore, AlertStore, MemoryStore, ReportStore};

/// One backend behind all three store traits
#[derive(Clone)]
pub struct Stores {
    pub alerts: Arc<dyn AlertStore>,
    pub reports: Arc<dyn ReportStore>,
    pub aggregates: Arc<dyn AggregateStore>,
}

impl Stores {
    fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: AlertStore + ReportStore + AggregateStore + 'static,
    {
        Self {
            alerts: backend.clone(),
            reports: backend.clone(),
            aggregates: backend,
        }
    }

    /// Open the backend described by `config`
    pub async fn open(config: &StorageConfig) -> anyhow::Result<Self> {
        match config {
            StorageConfig::None => {
                info!("using in-memory store (no persistence)");
                Ok(Self::from_backend(Arc::new(MemoryStore::new())))
            }
            #[cfg(feature = "storage-sqlite")]
            StorageConfig::Sqlite { path } => {
                let store = storage::sqlite::SqliteStore::new(path)
                    .await
                    .with_context(|| format!("failed to open {}", path.display()))?;
                Ok(Self::from_backend(Arc::new(store)))
            }
            #[cfg(not(feature = "storage-sqlite"))]
            StorageConfig::Sqlite { .. } => {
                anyhow::bail!("SQLite storage requested but the `storage-sqlite` feature is disabled")
            }
        }
    }
}

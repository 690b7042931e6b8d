use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::trace;
use uuid::Uuid;

use crate::polling::PollingConfig;

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./portal.db")
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    /// Storage configuration (optional - defaults to SQLite at `./portal.db`)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub report_worker: ReportWorkerConfig,

    #[serde(default)]
    pub aggregation_worker: AggregationWorkerConfig,

    #[serde(default)]
    pub alerts: AlertEngineConfig,
}

impl Config {
    /// Storage settings with `PORTAL_DATABASE` applied on top
    pub fn storage(&self) -> StorageConfig {
        let storage = self.storage.clone().unwrap_or_default();

        match (storage, crate::util::get_database_path()) {
            (StorageConfig::Sqlite { .. }, Some(path)) => StorageConfig::Sqlite { path },
            (storage, _) => storage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct ReportWorkerConfig {
    pub poll_interval_secs: u64,
    pub batch_size: usize,
    pub max_concurrent: usize,
    pub execution_timeout_secs: u64,
}

impl Default for ReportWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            batch_size: 10,
            max_concurrent: 5,
            execution_timeout_secs: 30 * 60,
        }
    }
}

impl ReportWorkerConfig {
    pub fn polling(&self) -> PollingConfig {
        PollingConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            batch_size: self.batch_size,
            max_concurrent: self.max_concurrent,
        }
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct AggregationWorkerConfig {
    pub refresh_interval_secs: u64,
    pub batch_size: usize,
    pub max_concurrent: usize,
    pub stale_threshold_secs: u64,
}

impl Default for AggregationWorkerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            batch_size: 20,
            max_concurrent: 5,
            stale_threshold_secs: 5 * 60,
        }
    }
}

impl AggregationWorkerConfig {
    pub fn polling(&self) -> PollingConfig {
        PollingConfig {
            interval: Duration::from_secs(self.refresh_interval_secs),
            batch_size: self.batch_size,
            max_concurrent: self.max_concurrent,
        }
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct AlertEngineConfig {
    /// Notification queue capacity
    pub queue_capacity: usize,

    /// Satellite source consulted by satellite-backed rules
    pub satellite_source: String,

    pub evaluation_interval_secs: u64,

    /// Projects evaluated concurrently per pass
    pub max_concurrent_projects: usize,

    /// Projects the alerts binary evaluates
    pub projects: Vec<Uuid>,

    pub webhook: Option<Webhook>,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            satellite_source: "sentinel2".to_string(),
            evaluation_interval_secs: 5 * 60,
            max_concurrent_projects: 5,
            projects: vec![],
            webhook: None,
        }
    }
}

impl AlertEngineConfig {
    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

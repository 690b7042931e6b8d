//! Timer-driven polling loop
//!
//! A [`PollingWorker`] repeatedly pulls a bounded batch of pending items from
//! a [`PollSource`] and hands them to the bounded dispatcher.
//!
//! ## Message Flow
//!
//! ```text
//! start ─► tick (immediate) ─► fetch(batch_size) ─► run_bounded(max_concurrent) ─┐
//!            ▲                                                                  │
//!            └──────────────────────── next tick ◄──────────────────────────────┘
//! ```
//!
//! ## Shutdown
//!
//! The loop selects between the ticker, its own stop signal ([`PollingWorker::stop`])
//! and the caller's cancellation signal. Both are only observed between
//! ticks: a batch that has been dispatched always runs to completion.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument};

use crate::dispatch::{DispatchReport, run_bounded};
use crate::shutdown::Shutdown;
use crate::storage::StorageResult;

/// A store-backed queue of work items and the handler that processes one
#[async_trait]
pub trait PollSource: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Up to `limit` pending items, oldest first
    async fn fetch(&self, limit: usize) -> StorageResult<Vec<Self::Item>>;

    /// Process a single item, containing its own errors
    async fn process(&self, item: Self::Item);
}

/// Tick period, batch size and dispatcher permit count of one loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    pub interval: Duration,
    pub batch_size: usize,
    pub max_concurrent: usize,
}

impl PollingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            bail!("polling interval must be greater than zero");
        }
        if self.batch_size == 0 {
            bail!("batch size must be greater than zero");
        }
        if self.max_concurrent == 0 {
            bail!("max concurrent must be greater than zero");
        }
        Ok(())
    }
}

pub struct PollingWorker<S: PollSource> {
    source: Arc<S>,
    config: PollingConfig,
    stop: Shutdown,
}

impl<S: PollSource> fmt::Debug for PollingWorker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingWorker")
            .field("source", &self.source.name())
            .field("config", &self.config)
            .finish()
    }
}

impl<S: PollSource> PollingWorker<S> {
    pub fn new(source: S, config: PollingConfig) -> Self {
        Self::with_shared(Arc::new(source), config)
    }

    pub fn with_shared(source: Arc<S>, config: PollingConfig) -> Self {
        Self {
            source,
            config,
            stop: Shutdown::new(),
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    /// Run the loop until [`stop`](Self::stop) is called or `cancel` is requested
    ///
    /// The first batch is fetched immediately. Returns an error only for an
    /// invalid configuration.
    #[instrument(skip_all, fields(worker = self.source.name()))]
    pub async fn start(&self, cancel: &Shutdown) -> Result<()> {
        self.config.validate()?;

        info!(
            "starting with interval {:?}, batch size {}, max concurrent {}",
            self.config.interval, self.config.batch_size, self.config.max_concurrent
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.wait() => {
                    debug!("cancellation requested");
                    break;
                }

                _ = self.stop.wait() => {
                    debug!("stop requested");
                    break;
                }

                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        info!("stopped");
        Ok(())
    }

    /// Ask a running loop to return after its current tick
    ///
    /// The stop is sticky: a later `start` on the same worker returns
    /// immediately.
    pub fn stop(&self) {
        self.stop.request();
    }

    /// Fetch one batch and dispatch it, waiting for every item
    pub async fn poll_once(&self) -> DispatchReport {
        let items = match self.source.fetch(self.config.batch_size).await {
            Ok(items) => items,
            Err(e) => {
                error!("failed to fetch pending {}: {}", self.source.name(), e);
                return DispatchReport::default();
            }
        };

        if items.is_empty() {
            return DispatchReport::default();
        }

        info!("processing {} {}", items.len(), self.source.name());

        let source = self.source.clone();
        let report = run_bounded(items, self.config.max_concurrent, move |item| {
            let source = source.clone();
            async move { source.process(item).await }
        })
        .await;

        debug!(
            "batch done: {} completed, {} panicked",
            report.completed, report.panicked
        );

        report
    }
}

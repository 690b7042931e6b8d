//! Bounded concurrent dispatch
//!
//! [`run_bounded`] runs one handler per item with at most `limit` handlers in
//! flight, then waits for all of them before returning.
//!
//! ## Behavior
//!
//! - A permit is acquired *before* each handler is spawned, so dispatch
//!   blocks while `limit` handlers are running
//! - Permits are released when a handler finishes, whatever the outcome
//! - A panicking handler is logged and counted; the other handlers and the
//!   caller are unaffected
//! - Handlers report their own errors; the dispatcher only sees completion

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Outcome counts of one [`run_bounded`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that ran to completion
    pub completed: usize,

    /// Handlers that panicked or were cancelled
    pub panicked: usize,
}

impl DispatchReport {
    pub fn total(&self) -> usize {
        self.completed + self.panicked
    }
}

/// Run `handler` once per item with at most `limit` concurrent invocations
///
/// Returns after every handler has finished. A `limit` of zero is treated
/// as one.
///
/// ## Example
///
/// ```
/// # use portal_monitoring::dispatch::run_bounded;
/// # #[tokio::main]
/// # async fn main() {
/// let report = run_bounded(vec![1, 2, 3], 2, |n| async move {
///     let _ = n * 2;
/// })
/// .await;
/// assert_eq!(report.completed, 3);
/// # }
/// ```
pub async fn run_bounded<T, F, Fut>(items: Vec<T>, limit: usize, handler: F) -> DispatchReport
where
    T: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut report = DispatchReport::default();

    if items.is_empty() {
        return report;
    }

    let limit = if limit == 0 {
        warn!("concurrency limit of 0 requested, using 1");
        1
    } else {
        limit
    };

    debug!("dispatching {} items with limit {}", items.len(), limit);

    let semaphore = Arc::new(Semaphore::new(limit));
    let mut tasks = JoinSet::new();

    for item in items {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                // the semaphore is never closed while we hold it
                error!("failed to acquire dispatch permit: {e}");
                break;
            }
        };

        let work = handler(item);
        tasks.spawn(async move {
            let _permit = permit;
            work.await;
        });
    }

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(()) => report.completed += 1,
            Err(e) if e.is_panic() => {
                error!("dispatched handler panicked: {e}");
                report.panicked += 1;
            }
            Err(e) => {
                warn!("dispatched handler was cancelled: {e}");
                report.panicked += 1;
            }
        }
    }

    report
}

//! Background workers built on the [`PollingWorker`](crate::polling::PollingWorker) loop
//!
//! - [`report`]: runs pending report executions
//! - [`aggregation`]: refreshes stale dashboard aggregates

pub mod aggregation;
pub mod report;

pub use aggregation::{AggregationProcessor, AggregationWorker};
pub use report::{ReportExecutor, ReportProcessor, ReportWorker, SimulatedReportExecutor};

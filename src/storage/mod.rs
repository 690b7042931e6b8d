//! Storage backends for rules, alerts, metric samples, executions and aggregates
//!
//! This module provides a trait-based abstraction over the shared persistent
//! store that the workers and the alert engine poll.
//!
//! ## Design
//!
//! - **Trait-based**: [`AlertStore`], [`ReportStore`] and [`AggregateStore`]
//!   let each consumer depend only on the operations it issues
//! - **Async**: All operations are async and shared across dispatched tasks
//! - **Store-enforced transitions**: Report execution status changes are
//!   validated by the backend, not by callers
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database, feature `storage-sqlite`
//! - **In-Memory**: No persistence, for tests and dry runs
//!
//! ## Usage
//!
//! ```no_run
//! use portal_monitoring::storage::sqlite::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./portal.db").await?;
//!     // Share with the workers behind an Arc
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{AggregateStore, AlertStore, ReportStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;

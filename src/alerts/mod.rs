//! Alert rule evaluation
//!
//! - [`condition`]: decoding of rule conditions and the pure comparisons
//! - [`evaluator`]: store-backed evaluation of one condition
//! - [`engine`]: per-project evaluation passes with cooldown suppression
//! - [`queue`]: bounded notification queue fed by the engine

pub mod condition;
pub mod engine;
pub mod evaluator;
pub mod queue;

pub use condition::{ComparisonOperator, Condition, EvaluationError};
pub use engine::{AlertEngine, EvaluationSummary};
pub use queue::{NotificationQueue, NotificationReceiver};

//! Rule conditions
//!
//! Rules are authored as a `condition_type` string plus a free-form JSON
//! `condition_config`. [`AlertRule::condition`] decodes the pair once into a
//! typed [`Condition`]; evaluators only ever see the typed form.
//!
//! ## Authoring format
//!
//! ```json
//! { "threshold": 40.0, "operator": "less_than" }          // threshold
//! { "max_rate": 20.0, "time_window_minutes": 120 }         // rate_of_change
//! { "max_gap_minutes": 90 }                                // data_gap
//! { "std_dev_threshold": 2.5, "lookback_hours": 48 }       // anomaly
//! ```

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::storage::StorageError;
use crate::storage::schema::{AlertRule, MetricSource};

/// Comparison applied by threshold conditions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    #[default]
    GreaterThan,
    LessThan,
    EqualTo,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

impl ComparisonOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOperator::GreaterThan => "greater_than",
            ComparisonOperator::LessThan => "less_than",
            ComparisonOperator::EqualTo => "equal_to",
            ComparisonOperator::GreaterThanOrEqual => "greater_than_or_equal",
            ComparisonOperator::LessThanOrEqual => "less_than_or_equal",
        }
    }

    /// Whether `value <op> threshold` holds
    pub fn compare(self, value: f64, threshold: f64) -> bool {
        match self {
            ComparisonOperator::GreaterThan => value > threshold,
            ComparisonOperator::LessThan => value < threshold,
            ComparisonOperator::EqualTo => value == threshold,
            ComparisonOperator::GreaterThanOrEqual => value >= threshold,
            ComparisonOperator::LessThanOrEqual => value <= threshold,
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded rule condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Threshold {
        threshold: f64,
        operator: ComparisonOperator,
    },
    RateOfChange {
        max_rate: f64,
        time_window_minutes: f64,
    },
    DataGap {
        max_gap_minutes: f64,
    },
    /// Reserved contract: evaluated, never triggers
    Anomaly {
        std_dev_threshold: f64,
        lookback_hours: f64,
    },
}

impl Condition {
    pub fn kind(&self) -> &'static str {
        match self {
            Condition::Threshold { .. } => "threshold",
            Condition::RateOfChange { .. } => "rate_of_change",
            Condition::DataGap { .. } => "data_gap",
            Condition::Anomaly { .. } => "anomaly",
        }
    }

    /// Human-readable alert message for a triggered rule
    pub fn alert_message(&self, rule_name: &str, metric_name: &str) -> String {
        match self {
            Condition::Threshold { .. } => {
                format!("{rule_name}: Threshold breach detected for {metric_name}")
            }
            Condition::RateOfChange { .. } => {
                format!("{rule_name}: Rapid change detected in {metric_name}")
            }
            Condition::DataGap { .. } => {
                format!("{rule_name}: Data gap detected - no recent data for {metric_name}")
            }
            Condition::Anomaly { .. } => {
                format!("{rule_name}: Anomalous value detected for {metric_name}")
            }
        }
    }
}

#[derive(Deserialize)]
struct ThresholdConfig {
    threshold: f64,
    #[serde(default)]
    operator: ComparisonOperator,
}

#[derive(Deserialize)]
struct RateOfChangeConfig {
    max_rate: f64,
    #[serde(default = "default_time_window_minutes")]
    time_window_minutes: f64,
}

fn default_time_window_minutes() -> f64 {
    60.0
}

#[derive(Deserialize)]
struct DataGapConfig {
    max_gap_minutes: f64,
}

#[derive(Deserialize)]
struct AnomalyConfig {
    #[serde(default = "default_std_dev_threshold")]
    std_dev_threshold: f64,
    #[serde(default = "default_lookback_hours")]
    lookback_hours: f64,
}

fn default_std_dev_threshold() -> f64 {
    3.0
}

fn default_lookback_hours() -> f64 {
    24.0
}

fn decode<T: DeserializeOwned>(condition_type: &str, config: &Value) -> Result<T, EvaluationError> {
    let config = match config {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };

    serde_json::from_value(config)
        .map_err(|e| EvaluationError::InvalidConfig(format!("{condition_type} condition: {e}")))
}

fn non_negative(name: &str, value: f64) -> Result<f64, EvaluationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(EvaluationError::InvalidConfig(format!(
            "{name} must be a non-negative number, got {value}"
        )))
    }
}

impl AlertRule {
    /// Decode `condition_type` + `condition_config` into a [`Condition`]
    pub fn condition(&self) -> Result<Condition, EvaluationError> {
        let kind = self.condition_type.as_str();
        let config = &self.condition_config;

        match kind {
            "threshold" => {
                let ThresholdConfig {
                    threshold,
                    operator,
                } = decode(kind, config)?;
                Ok(Condition::Threshold {
                    threshold,
                    operator,
                })
            }
            "rate_of_change" => {
                let RateOfChangeConfig {
                    max_rate,
                    time_window_minutes,
                } = decode(kind, config)?;
                Ok(Condition::RateOfChange {
                    max_rate: non_negative("max_rate", max_rate)?,
                    time_window_minutes: non_negative("time_window_minutes", time_window_minutes)?,
                })
            }
            "data_gap" => {
                let DataGapConfig { max_gap_minutes } = decode(kind, config)?;
                Ok(Condition::DataGap {
                    max_gap_minutes: non_negative("max_gap_minutes", max_gap_minutes)?,
                })
            }
            "anomaly" => {
                let AnomalyConfig {
                    std_dev_threshold,
                    lookback_hours,
                } = decode(kind, config)?;
                Ok(Condition::Anomaly {
                    std_dev_threshold,
                    lookback_hours,
                })
            }
            other => Err(EvaluationError::InvalidConfig(format!(
                "unknown condition type: {other}"
            ))),
        }
    }
}

/// Percentage change from `first` to `last`
pub fn percent_change(first: f64, last: f64) -> Result<f64, EvaluationError> {
    if first == 0.0 {
        return Err(EvaluationError::Computation(
            "rate of change is undefined when the first value is zero".to_string(),
        ));
    }
    Ok((last - first) / first * 100.0)
}

/// Whether `rate` exceeds `max_rate` in either direction
pub fn exceeds_rate(rate: f64, max_rate: f64) -> bool {
    rate > max_rate || rate < -max_rate
}

pub fn minutes(value: f64) -> TimeDelta {
    TimeDelta::milliseconds((value * 60_000.0).round() as i64)
}

/// Time since `last_seen` and whether it is longer than `max_gap_minutes`
pub fn data_gap(last_seen: DateTime<Utc>, now: DateTime<Utc>, max_gap_minutes: f64) -> (TimeDelta, bool) {
    let gap = now - last_seen;
    (gap, gap > minutes(max_gap_minutes))
}

/// Why a single rule could not be evaluated
#[derive(Debug)]
pub enum EvaluationError {
    /// Missing or malformed condition fields, unknown condition type
    InvalidConfig(String),

    /// The condition type cannot read from this metric source
    UnsupportedSource {
        condition: &'static str,
        source: MetricSource,
    },

    /// No value to evaluate against
    NoData(String),

    /// The values found cannot be evaluated
    Computation(String),

    Storage(StorageError),
}

impl EvaluationError {
    /// Missing data is an expected outcome, not a fault
    pub fn is_data_insufficiency(&self) -> bool {
        matches!(self, EvaluationError::NoData(_))
    }
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationError::InvalidConfig(msg) => write!(f, "invalid rule configuration: {}", msg),
            EvaluationError::UnsupportedSource { condition, source } => {
                write!(f, "{} is not supported for {} metrics", condition, source)
            }
            EvaluationError::NoData(msg) => write!(f, "no data: {}", msg),
            EvaluationError::Computation(msg) => write!(f, "evaluation failed: {}", msg),
            EvaluationError::Storage(err) => write!(f, "store error: {}", err),
        }
    }
}

impl std::error::Error for EvaluationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EvaluationError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for EvaluationError {
    fn from(err: StorageError) -> Self {
        EvaluationError::Storage(err)
    }
}

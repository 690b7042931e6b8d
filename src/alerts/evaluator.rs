//! Store-backed evaluation of decoded rule conditions
//!
//! Each evaluator resolves the values it needs from the [`AlertStore`] and
//! returns the trigger decision together with a details payload recording
//! exactly what was compared.
//!
//! ## Metric sources
//!
//! | condition        | sensor              | satellite          | calculated              |
//! |------------------|---------------------|--------------------|-------------------------|
//! | `threshold`      | mean over last hour | latest observation | latest `daily` value    |
//! | `rate_of_change` | unsupported         | unsupported        | `raw` series in window  |
//! | `data_gap`       | newest in last 24h  | latest observation | unsupported             |
//! | `anomaly`        | never triggers      | never triggers     | never triggers          |

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Value, json};
use tracing::trace;
use uuid::Uuid;

use crate::storage::AlertStore;
use crate::storage::schema::{AlertRule, JsonMap, MetricSample, MetricSource};

use super::condition::{
    ComparisonOperator, Condition, EvaluationError, data_gap, exceeds_rate, minutes,
    percent_change,
};

/// Aggregation period of the value a calculated threshold compares
const CALCULATED_THRESHOLD_PERIOD: &str = "daily";

/// Aggregation period of the series a rate of change is computed over
const RATE_OF_CHANGE_PERIOD: &str = "raw";

/// Outcome of evaluating one rule
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub triggered: bool,
    pub details: JsonMap,
}

/// Evaluates rule conditions against one store
pub struct Evaluator<'a> {
    store: &'a dyn AlertStore,
    satellite_source: &'a str,
}

impl<'a> Evaluator<'a> {
    pub fn new(store: &'a dyn AlertStore, satellite_source: &'a str) -> Self {
        Self {
            store,
            satellite_source,
        }
    }

    pub async fn evaluate(
        &self,
        rule: &AlertRule,
        condition: &Condition,
        project_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, EvaluationError> {
        match *condition {
            Condition::Threshold {
                threshold,
                operator,
            } => {
                self.threshold(rule, project_id, threshold, operator, now)
                    .await
            }
            Condition::RateOfChange {
                max_rate,
                time_window_minutes,
            } => {
                self.rate_of_change(rule, project_id, max_rate, time_window_minutes, now)
                    .await
            }
            Condition::DataGap { max_gap_minutes } => {
                self.data_gap(rule, project_id, max_gap_minutes, now).await
            }
            Condition::Anomaly {
                std_dev_threshold,
                lookback_hours,
            } => Ok(anomaly(std_dev_threshold, lookback_hours, now)),
        }
    }

    async fn threshold(
        &self,
        rule: &AlertRule,
        project_id: Uuid,
        threshold: f64,
        operator: ComparisonOperator,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, EvaluationError> {
        let current_value = self.current_value(rule, project_id, now).await?;
        let triggered = operator.compare(current_value, threshold);

        trace!(
            "{} {} {} => {}",
            current_value, operator, threshold, triggered
        );

        Ok(Evaluation {
            triggered,
            details: details(
                "threshold",
                now,
                [
                    ("threshold", json!(threshold)),
                    ("operator", json!(operator.as_str())),
                    ("current_value", json!(current_value)),
                    ("metric_name", json!(rule.metric_name)),
                    ("metric_source", json!(rule.metric_source.as_str())),
                ],
            ),
        })
    }

    /// Current scalar for a threshold comparison
    async fn current_value(
        &self,
        rule: &AlertRule,
        project_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<f64, EvaluationError> {
        match rule.metric_source {
            MetricSource::Sensor => {
                let sensor_type = sensor_type(rule)?;
                let readings = self
                    .store
                    .fetch_sensor_readings(project_id, sensor_type, now - TimeDelta::hours(1), now)
                    .await?;

                let samples: Vec<MetricSample> = readings.iter().map(MetricSample::from).collect();
                mean(&samples).ok_or_else(|| {
                    EvaluationError::NoData(format!("no {sensor_type} readings in the last hour"))
                })
            }
            MetricSource::Satellite => {
                let observation = self
                    .store
                    .fetch_latest_satellite_observation(project_id, self.satellite_source)
                    .await?
                    .ok_or_else(|| {
                        EvaluationError::NoData(format!(
                            "no {} observations",
                            self.satellite_source
                        ))
                    })?;

                observation.index(&rule.metric_name).ok_or_else(|| {
                    EvaluationError::NoData(format!(
                        "{} not present in latest observation",
                        rule.metric_name
                    ))
                })
            }
            MetricSource::Calculated => self
                .store
                .fetch_latest_metric(project_id, &rule.metric_name, CALCULATED_THRESHOLD_PERIOD)
                .await?
                .map(|metric| metric.value)
                .ok_or_else(|| {
                    EvaluationError::NoData(format!("no {} value for {}", CALCULATED_THRESHOLD_PERIOD, rule.metric_name))
                }),
        }
    }

    async fn rate_of_change(
        &self,
        rule: &AlertRule,
        project_id: Uuid,
        max_rate: f64,
        time_window_minutes: f64,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, EvaluationError> {
        if rule.metric_source != MetricSource::Calculated {
            return Err(EvaluationError::UnsupportedSource {
                condition: "rate_of_change",
                source: rule.metric_source,
            });
        }

        let since = now
            .checked_sub_signed(minutes(time_window_minutes))
            .ok_or_else(|| {
                EvaluationError::InvalidConfig(format!(
                    "time_window_minutes {time_window_minutes} is out of range"
                ))
            })?;

        let series = self
            .store
            .fetch_metric_series(
                project_id,
                &rule.metric_name,
                RATE_OF_CHANGE_PERIOD,
                since,
                now,
            )
            .await?;

        let samples: Vec<MetricSample> = series.iter().map(MetricSample::from).collect();

        let (first, last) = match samples.as_slice() {
            [first, .., last] => (first.value, last.value),
            _ => {
                trace!("{} samples in window, not enough for a rate", samples.len());
                return Ok(Evaluation {
                    triggered: false,
                    details: details(
                        "rate_of_change",
                        now,
                        [
                            ("max_rate", json!(max_rate)),
                            ("sample_count", json!(samples.len())),
                            ("time_window_minutes", json!(time_window_minutes)),
                        ],
                    ),
                });
            }
        };

        let actual_rate = percent_change(first, last)?;

        Ok(Evaluation {
            triggered: exceeds_rate(actual_rate, max_rate),
            details: details(
                "rate_of_change",
                now,
                [
                    ("max_rate", json!(max_rate)),
                    ("actual_rate", json!(actual_rate)),
                    ("first_value", json!(first)),
                    ("last_value", json!(last)),
                    ("sample_count", json!(samples.len())),
                    ("time_window_minutes", json!(time_window_minutes)),
                ],
            ),
        })
    }

    async fn data_gap(
        &self,
        rule: &AlertRule,
        project_id: Uuid,
        max_gap_minutes: f64,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, EvaluationError> {
        let last_seen = match rule.metric_source {
            MetricSource::Sensor => {
                let sensor_type = sensor_type(rule)?;
                self.store
                    .fetch_sensor_readings(project_id, sensor_type, now - TimeDelta::hours(24), now)
                    .await?
                    .iter()
                    .map(|reading| reading.time)
                    .max()
            }
            MetricSource::Satellite => self
                .store
                .fetch_latest_satellite_observation(project_id, self.satellite_source)
                .await?
                .map(|observation| observation.time),
            MetricSource::Calculated => {
                return Err(EvaluationError::UnsupportedSource {
                    condition: "data_gap",
                    source: rule.metric_source,
                });
            }
        };

        // no data at all counts as a gap since the epoch
        let data_found = last_seen.is_some();
        let last_seen = last_seen.unwrap_or(DateTime::UNIX_EPOCH);
        let (gap, triggered) = data_gap(last_seen, now, max_gap_minutes);

        Ok(Evaluation {
            triggered,
            details: details(
                "data_gap",
                now,
                [
                    ("max_gap_minutes", json!(max_gap_minutes)),
                    ("actual_gap_minutes", json!(gap.num_seconds() as f64 / 60.0)),
                    ("last_data_time", json!(last_seen.to_rfc3339())),
                    ("data_found", json!(data_found)),
                ],
            ),
        })
    }
}

/// Statistical detection is not implemented; the condition never triggers
fn anomaly(std_dev_threshold: f64, lookback_hours: f64, now: DateTime<Utc>) -> Evaluation {
    Evaluation {
        triggered: false,
        details: details(
            "anomaly",
            now,
            [
                ("std_dev_threshold", json!(std_dev_threshold)),
                ("lookback_hours", json!(lookback_hours)),
                (
                    "note",
                    json!("Anomaly detection requires historical data analysis"),
                ),
            ],
        ),
    }
}

fn sensor_type(rule: &AlertRule) -> Result<&str, EvaluationError> {
    rule.sensor_type.as_deref().ok_or_else(|| {
        EvaluationError::InvalidConfig("sensor_type is required for sensor metrics".to_string())
    })
}

fn mean(samples: &[MetricSample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64)
}

fn details<const N: usize>(
    condition_type: &str,
    now: DateTime<Utc>,
    values: [(&str, Value); N],
) -> JsonMap {
    let mut details = JsonMap::new();
    details.insert("condition_type".to_string(), json!(condition_type));
    for (key, value) in values {
        details.insert(key.to_string(), value);
    }
    details.insert("evaluation_time".to_string(), json!(now.to_rfc3339()));
    details
}

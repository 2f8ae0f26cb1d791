//! Sensor readings and the reading-source seam
//!
//! Hardware acquisition is outside this crate. Everything the monitor needs
//! from a sensor is the [`ReadingSource`] trait: one call per metric, returning
//! a timestamped [`Reading`] that carries its own validity flag.

pub mod calibration;
pub mod simulated;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use calibration::SoilCalibration;
pub use simulated::SimulatedSource;

/// Physical quantity measured by a sensor channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Temperature,
    Humidity,
    SoilMoisture,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [
        MetricKind::Temperature,
        MetricKind::Humidity,
        MetricKind::SoilMoisture,
    ];

    /// Wire/config key, e.g. `soil_moisture`
    pub fn key(&self) -> &'static str {
        match self {
            MetricKind::Temperature => "temperature",
            MetricKind::Humidity => "humidity",
            MetricKind::SoilMoisture => "soil_moisture",
        }
    }

    /// Human-facing name, e.g. `Soil Moisture`
    pub fn display_name(&self) -> &'static str {
        match self {
            MetricKind::Temperature => "Temperature",
            MetricKind::Humidity => "Humidity",
            MetricKind::SoilMoisture => "Soil Moisture",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            MetricKind::Temperature => "°C",
            MetricKind::Humidity | MetricKind::SoilMoisture => "%",
        }
    }

    /// Range the sensor hardware can physically report. Values outside it
    /// are treated as read faults, not as environmental conditions.
    pub fn valid_range(&self) -> (f64, f64) {
        match self {
            MetricKind::Temperature => (-40.0, 80.0),
            MetricKind::Humidity | MetricKind::SoilMoisture => (0.0, 100.0),
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.key() == key)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Reasons a raw measurement is rejected
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("{metric} value {value} outside valid range [{min}, {max}]")]
    OutOfRange {
        metric: MetricKind,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{metric} value is not a finite number")]
    NotFinite { metric: MetricKind },
    #[error("{metric} read failed: {reason}")]
    ReadFailed { metric: MetricKind, reason: String },
}

/// One measurement. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub value: f64,
    pub metric: MetricKind,
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
    pub error: Option<String>,
}

impl Reading {
    /// Build a reading, validating the value against the metric's physical range
    pub fn new(metric: MetricKind, value: f64) -> Self {
        match validate_value(metric, value) {
            Ok(()) => Self {
                value,
                metric,
                timestamp: Utc::now(),
                valid: true,
                error: None,
            },
            Err(e) => Self::invalid(metric, value, e),
        }
    }

    pub fn invalid(metric: MetricKind, value: f64, error: ValidationError) -> Self {
        Self {
            value,
            metric,
            timestamp: Utc::now(),
            valid: false,
            error: Some(error.to_string()),
        }
    }

    /// A reading for a channel that produced no value at all
    pub fn failed(metric: MetricKind, reason: impl Into<String>) -> Self {
        Self::invalid(
            metric,
            f64::NAN,
            ValidationError::ReadFailed {
                metric,
                reason: reason.into(),
            },
        )
    }
}

/// Check a raw value against the metric's physical range
pub fn validate_value(metric: MetricKind, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite { metric });
    }
    let (min, max) = metric.valid_range();
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            metric,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// The valid readings of one tick, keyed by metric. Built once per tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    readings: BTreeMap<MetricKind, Reading>,
}

impl Sample {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reading. Invalid readings are rejected and returned to the caller.
    pub fn insert(&mut self, reading: Reading) -> Result<(), Reading> {
        if !reading.valid {
            return Err(reading);
        }
        self.readings.insert(reading.metric, reading);
        Ok(())
    }

    pub fn get(&self, metric: MetricKind) -> Option<&Reading> {
        self.readings.get(&metric)
    }

    pub fn value(&self, metric: MetricKind) -> Option<f64> {
        self.get(metric).map(|r| r.value)
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.values()
    }

    /// `metric key -> value` map used for payloads and log lines
    pub fn values(&self) -> BTreeMap<&'static str, f64> {
        self.readings
            .values()
            .map(|r| (r.metric.key(), r.value))
            .collect()
    }
}

impl FromIterator<Reading> for Sample {
    fn from_iter<I: IntoIterator<Item = Reading>>(iter: I) -> Self {
        let mut sample = Sample::new();
        for reading in iter {
            let _ = sample.insert(reading);
        }
        sample
    }
}

/// Source of sensor readings
///
/// Implementations must not block indefinitely and must report failures
/// through [`Reading::valid`] rather than panicking.
pub trait ReadingSource: Send {
    /// Metrics this source can produce, in reading order
    fn metrics(&self) -> Vec<MetricKind>;

    /// Take one reading of `metric`
    fn read(&mut self, metric: MetricKind) -> Reading;

    /// Sensor names announced in the `online` status message
    fn sensor_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Release hardware handles. Called once during shutdown.
    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_keys_round_trip() {
        for metric in MetricKind::ALL {
            assert_eq!(MetricKind::from_key(metric.key()), Some(metric));
        }
        assert_eq!(MetricKind::from_key("pressure"), None);
    }

    #[test]
    fn test_reading_within_range_is_valid() {
        let reading = Reading::new(MetricKind::Temperature, 25.5);
        assert!(reading.valid);
        assert!(reading.error.is_none());
    }

    #[test]
    fn test_reading_out_of_range_is_invalid() {
        let reading = Reading::new(MetricKind::Humidity, 104.0);
        assert!(!reading.valid);
        assert!(reading.error.unwrap().contains("outside valid range"));

        let reading = Reading::new(MetricKind::Temperature, -41.0);
        assert!(!reading.valid);
    }

    #[test]
    fn test_reading_nan_is_invalid() {
        let reading = Reading::new(MetricKind::SoilMoisture, f64::NAN);
        assert!(!reading.valid);
        assert!(reading.error.unwrap().contains("not a finite number"));
    }

    #[test]
    fn test_failed_reading_carries_reason() {
        let reading = Reading::failed(MetricKind::Temperature, "checksum mismatch");
        assert!(!reading.valid);
        assert!(reading.error.unwrap().contains("checksum mismatch"));
    }

    #[test]
    fn test_sample_rejects_invalid_readings() {
        let mut sample = Sample::new();
        assert!(sample.insert(Reading::new(MetricKind::Temperature, 22.0)).is_ok());
        assert!(sample.insert(Reading::new(MetricKind::Humidity, 150.0)).is_err());

        assert_eq!(sample.len(), 1);
        assert_eq!(sample.value(MetricKind::Temperature), Some(22.0));
        assert_eq!(sample.value(MetricKind::Humidity), None);
    }

    #[test]
    fn test_sample_values_are_keyed_by_wire_name() {
        let sample: Sample = vec![
            Reading::new(MetricKind::SoilMoisture, 45.0),
            Reading::new(MetricKind::Temperature, 21.0),
        ]
        .into_iter()
        .collect();

        let values = sample.values();
        assert_eq!(values.get("soil_moisture"), Some(&45.0));
        assert_eq!(values.get("temperature"), Some(&21.0));
    }
}

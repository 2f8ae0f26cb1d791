//! Threshold bands and alert timing settings
//!
//! Thresholds load from the `[alerts]` and `[thresholds.<metric>]` tables of
//! the main config, or from a standalone file with the same two tables.

use crate::config::ConfigError;
use crate::sensors::MetricKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Which side of a band was crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdKind {
    Min,
    Max,
}

impl ThresholdKind {
    /// Word used in alert messages
    pub fn comparison(&self) -> &'static str {
        match self {
            ThresholdKind::Min => "below",
            ThresholdKind::Max => "above",
        }
    }
}

/// Acceptable range; either bound may be absent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Band {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Band {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    /// Bound the value lies strictly outside of, min checked first.
    /// A value equal to a bound is in band.
    pub fn violation(&self, value: f64) -> Option<(ThresholdKind, f64)> {
        if let Some(min) = self.min {
            if value < min {
                return Some((ThresholdKind::Min, min));
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return Some((ThresholdKind::Max, max));
            }
        }
        None
    }

    fn validate(&self, label: &str) -> Result<(), ConfigError> {
        for bound in [self.min, self.max].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(ConfigError::InvalidConfig(format!(
                    "{label} bound {bound} is not finite"
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(ConfigError::InvalidConfig(format!(
                    "{label} min {min} exceeds max {max}"
                )));
            }
        }
        Ok(())
    }
}

/// Bands and optional timing overrides for one metric
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricThresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<Band>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<Band>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consecutive_readings: Option<u32>,
}

/// Global alert timing, the `[alerts]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSettings {
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_consecutive")]
    pub consecutive_readings: u32,
}

fn default_cooldown() -> u64 {
    300
}

fn default_consecutive() -> u32 {
    2
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
            consecutive_readings: default_consecutive(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ThresholdFile {
    #[serde(default)]
    alerts: AlertSettings,
    #[serde(default)]
    thresholds: BTreeMap<String, MetricThresholds>,
}

/// Validated thresholds for every configured metric
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdSpec {
    settings: AlertSettings,
    metrics: BTreeMap<MetricKind, MetricThresholds>,
}

impl ThresholdSpec {
    pub fn new(settings: AlertSettings) -> Self {
        Self {
            settings,
            metrics: BTreeMap::new(),
        }
    }

    /// Validate raw tables keyed by metric name
    pub fn from_parts(
        settings: AlertSettings,
        raw: &BTreeMap<String, MetricThresholds>,
    ) -> Result<Self, ConfigError> {
        if settings.consecutive_readings == 0 {
            return Err(ConfigError::InvalidConfig(
                "[alerts] consecutive_readings must be at least 1".to_string(),
            ));
        }

        let mut spec = Self::new(settings);
        for (key, thresholds) in raw {
            let metric = MetricKind::from_key(key).ok_or_else(|| {
                ConfigError::InvalidConfig(format!("unknown threshold metric '{key}'"))
            })?;
            spec = spec.with_metric(metric, thresholds.clone())?;
        }
        Ok(spec)
    }

    /// Load a standalone thresholds file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ThresholdFile = toml::from_str(content)?;
        Self::from_parts(file.alerts, &file.thresholds)
    }

    pub fn with_metric(
        mut self,
        metric: MetricKind,
        thresholds: MetricThresholds,
    ) -> Result<Self, ConfigError> {
        if let Some(band) = &thresholds.warning {
            band.validate(&format!("{metric} warning"))?;
        }
        if let Some(band) = &thresholds.critical {
            band.validate(&format!("{metric} critical"))?;
        }
        if thresholds.consecutive_readings == Some(0) {
            return Err(ConfigError::InvalidConfig(format!(
                "{metric} consecutive_readings must be at least 1"
            )));
        }
        self.metrics.insert(metric, thresholds);
        Ok(self)
    }

    pub fn settings(&self) -> &AlertSettings {
        &self.settings
    }

    pub fn for_metric(&self, metric: MetricKind) -> Option<&MetricThresholds> {
        self.metrics.get(&metric)
    }

    pub fn metrics(&self) -> impl Iterator<Item = MetricKind> + '_ {
        self.metrics.keys().copied()
    }

    pub fn cooldown_for(&self, metric: MetricKind) -> Duration {
        let secs = self
            .for_metric(metric)
            .and_then(|t| t.cooldown_secs)
            .unwrap_or(self.settings.cooldown_secs);
        Duration::from_secs(secs)
    }

    pub fn consecutive_for(&self, metric: MetricKind) -> u32 {
        self.for_metric(metric)
            .and_then(|t| t.consecutive_readings)
            .unwrap_or(self.settings.consecutive_readings)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_bounds_are_strict() {
        let band = Band::new(Some(10.0), Some(30.0));

        assert_eq!(band.violation(10.0), None);
        assert_eq!(band.violation(30.0), None);
        assert_eq!(band.violation(9.9), Some((ThresholdKind::Min, 10.0)));
        assert_eq!(band.violation(30.1), Some((ThresholdKind::Max, 30.0)));
    }

    #[test]
    fn test_band_with_missing_bounds() {
        assert_eq!(Band::default().violation(-1000.0), None);
        assert_eq!(Band::new(None, Some(5.0)).violation(-1000.0), None);
        assert!(Band::new(Some(5.0), None).violation(-1000.0).is_some());
    }

    #[test]
    fn test_standalone_file_parses() {
        let spec = ThresholdSpec::from_toml_str(
            r#"
[alerts]
cooldown_secs = 60

[thresholds.humidity]
warning = { min = 40.0, max = 80.0 }
critical = { min = 30.0, max = 90.0 }
cooldown_secs = 900
"#,
        )
        .unwrap();

        assert_eq!(spec.cooldown_for(MetricKind::Humidity), Duration::from_secs(900));
        assert_eq!(spec.cooldown_for(MetricKind::Temperature), Duration::from_secs(60));
        assert_eq!(spec.consecutive_for(MetricKind::Humidity), 2);
        assert!(spec.for_metric(MetricKind::SoilMoisture).is_none());
    }

    #[test]
    fn test_inverted_band_rejected() {
        let result = ThresholdSpec::from_toml_str(
            r#"
[thresholds.temperature]
warning = { min = 30.0, max = 10.0 }
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_consecutive_rejected() {
        let result = ThresholdSpec::from_toml_str(
            r#"
[alerts]
consecutive_readings = 0
"#,
        );
        assert!(result.is_err());

        let result = ThresholdSpec::new(AlertSettings::default()).with_metric(
            MetricKind::Humidity,
            MetricThresholds {
                consecutive_readings: Some(0),
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }
}

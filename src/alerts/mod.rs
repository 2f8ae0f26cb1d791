//! Debounced, rate-limited threshold alerting
//!
//! [`AlertEngine`] turns a stream of readings into alert events. A metric must
//! sit outside a band for `consecutive_readings` evaluations in a row before it
//! alerts, and each `(metric, severity)` pair is then quiet for
//! `cooldown_secs`. Critical bands are checked before warning bands.

pub mod thresholds;

use crate::sensors::{MetricKind, Sample};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Instant;
use tracing::debug;

pub use thresholds::{AlertSettings, Band, MetricThresholds, ThresholdKind, ThresholdSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A confirmed threshold violation ready to publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub metric: MetricKind,
    pub severity: Severity,
    pub value: f64,
    pub threshold_kind: ThresholdKind,
    pub threshold_value: f64,
    pub message: String,
}

impl AlertEvent {
    pub fn new(
        metric: MetricKind,
        severity: Severity,
        value: f64,
        threshold_kind: ThresholdKind,
        threshold_value: f64,
    ) -> Self {
        let unit = metric.unit();
        let message = format!(
            "{} is {} {} threshold: {:?}{unit} (threshold: {:?}{unit})",
            metric.display_name(),
            threshold_kind.comparison(),
            severity,
            value,
            threshold_value,
        );
        Self {
            metric,
            severity,
            value,
            threshold_kind,
            threshold_value,
            message,
        }
    }
}

/// Streak bookkeeping for one metric
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AlertState {
    pub consecutive_count: u32,
    pub current_severity: Option<Severity>,
}

/// Classify a value against a metric's bands, critical first
pub fn classify(
    thresholds: &MetricThresholds,
    value: f64,
) -> Option<(Severity, ThresholdKind, f64)> {
    let checks = [
        (Severity::Critical, thresholds.critical.as_ref()),
        (Severity::Warning, thresholds.warning.as_ref()),
    ];
    checks.into_iter().find_map(|(severity, band)| {
        band.and_then(|b| b.violation(value))
            .map(|(kind, bound)| (severity, kind, bound))
    })
}

/// Stateful per-metric evaluator. Owned by a single control task.
#[derive(Debug)]
pub struct AlertEngine {
    spec: ThresholdSpec,
    states: BTreeMap<MetricKind, AlertState>,
    last_fired: HashMap<(MetricKind, Severity), Instant>,
}

impl AlertEngine {
    pub fn new(spec: ThresholdSpec) -> Self {
        Self {
            spec,
            states: BTreeMap::new(),
            last_fired: HashMap::new(),
        }
    }

    pub fn spec(&self) -> &ThresholdSpec {
        &self.spec
    }

    pub fn state(&self, metric: MetricKind) -> AlertState {
        self.states.get(&metric).copied().unwrap_or_default()
    }

    pub fn evaluate(&mut self, metric: MetricKind, value: f64) -> Option<AlertEvent> {
        self.evaluate_at(metric, value, Instant::now())
    }

    /// Evaluate one value with an explicit clock
    pub fn evaluate_at(
        &mut self,
        metric: MetricKind,
        value: f64,
        now: Instant,
    ) -> Option<AlertEvent> {
        let thresholds = self.spec.for_metric(metric)?;
        if !value.is_finite() {
            return None;
        }

        let Some((severity, kind, bound)) = classify(thresholds, value) else {
            self.states.insert(metric, AlertState::default());
            return None;
        };

        let required = self.spec.consecutive_for(metric);
        let cooldown = self.spec.cooldown_for(metric);

        let state = self.states.entry(metric).or_default();
        if state.current_severity == Some(severity) {
            state.consecutive_count = state.consecutive_count.saturating_add(1);
        } else {
            state.current_severity = Some(severity);
            state.consecutive_count = 1;
        }

        if state.consecutive_count < required {
            debug!(
                metric = %metric,
                severity = %severity,
                count = state.consecutive_count,
                required,
                "threshold violation pending confirmation"
            );
            return None;
        }

        if let Some(last) = self.last_fired.get(&(metric, severity)) {
            if now.saturating_duration_since(*last) < cooldown {
                debug!(metric = %metric, severity = %severity, "alert suppressed by cooldown");
                return None;
            }
        }

        self.last_fired.insert((metric, severity), now);
        Some(AlertEvent::new(metric, severity, value, kind, bound))
    }

    /// Evaluate every reading of a sample in metric order
    pub fn evaluate_sample(&mut self, sample: &Sample) -> Vec<AlertEvent> {
        self.evaluate_sample_at(sample, Instant::now())
    }

    pub fn evaluate_sample_at(&mut self, sample: &Sample, now: Instant) -> Vec<AlertEvent> {
        sample
            .iter()
            .filter_map(|reading| self.evaluate_at(reading.metric, reading.value, now))
            .collect()
    }

    /// Forget all streaks and cooldowns
    pub fn reset(&mut self) {
        self.states.clear();
        self.last_fired.clear();
    }
}

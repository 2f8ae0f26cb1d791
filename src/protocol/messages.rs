//! Outbound message payloads
//!
//! Telemetry and status messages are compact JSON envelopes carrying device
//! metadata and an ISO-8601 timestamp plus epoch seconds. Alerts are a
//! plain-text body meant to be relayed verbatim to email/SMS subscribers.

use crate::alerts::AlertEvent;
use crate::sensors::{MetricKind, Sample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write as _;

/// JSON envelope shared by telemetry and status messages
///
/// # Examples
/// ```
/// use fieldmon::protocol::Envelope;
/// use chrono::Utc;
/// use serde_json::json;
///
/// let envelope = Envelope::new(json!({"temperature": 24.5}), "farm-001", None, Utc::now());
/// let payload = envelope.to_payload().unwrap();
/// assert!(payload.starts_with(r#"{"data":{"temperature":24.5}"#));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<T> {
    pub data: T,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the Unix epoch with sub-second precision
    pub epoch: f64,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(data: T, device_id: &str, location: Option<&str>, timestamp: DateTime<Utc>) -> Self {
        Self {
            data,
            device_id: device_id.to_string(),
            location: location.map(str::to_string),
            timestamp,
            epoch: epoch_seconds(timestamp),
        }
    }

    /// Compact (no whitespace) JSON encoding
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub fn epoch_seconds(timestamp: DateTime<Utc>) -> f64 {
    timestamp.timestamp_millis() as f64 / 1000.0
}

/// Device lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Error,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Error => "error",
        }
    }
}

/// `data` section of a status message. Details are merged in at the top level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusData {
    pub status: DeviceStatus,
    pub device_id: String,
    pub uptime_seconds: f64,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl StatusData {
    pub fn new(status: DeviceStatus, device_id: &str, uptime_seconds: f64) -> Self {
        Self {
            status,
            device_id: device_id.to_string(),
            uptime_seconds,
            details: Map::new(),
        }
    }

    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        // Reserved keys stay authoritative
        for (key, value) in details {
            if !matches!(key.as_str(), "status" | "device_id" | "uptime_seconds") {
                self.details.insert(key, value);
            }
        }
        self
    }
}

/// Payload registered as the MQTT last will, so the broker announces the
/// device offline when the link drops without a clean disconnect
pub fn last_will_payload(device_id: &str) -> Result<String, serde_json::Error> {
    let data = StatusData::new(DeviceStatus::Offline, device_id, 0.0);
    Envelope::new(data, device_id, None, Utc::now()).to_payload()
}

const ALERT_RULE: &str = "========================================";

/// Human-readable alert body
pub fn format_alert_body(
    event: &AlertEvent,
    device_id: &str,
    time: DateTime<Utc>,
    readings: Option<&Sample>,
) -> String {
    let mut body = String::new();

    let _ = writeln!(body);
    let _ = writeln!(
        body,
        "AGRICULTURE ALERT - {}",
        event.severity.as_str().to_uppercase()
    );
    let _ = writeln!(body, "{ALERT_RULE}");
    let _ = writeln!(body);
    let _ = writeln!(body, "Device: {device_id}");
    let _ = writeln!(body, "Time: {}", time.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(body, "Type: {}", event.metric.display_name());
    let _ = writeln!(body);
    let _ = writeln!(body, "ALERT: {}", event.message);

    if let Some(sample) = readings.filter(|s| !s.is_empty()) {
        let _ = writeln!(body);
        let _ = writeln!(body, "Current Readings:");
        for metric in MetricKind::ALL {
            if let Some(value) = sample.value(metric) {
                let _ = writeln!(
                    body,
                    "   {}: {:.1}{}",
                    metric.display_name(),
                    value,
                    metric.unit()
                );
            }
        }
    }

    let _ = writeln!(body);
    let _ = writeln!(body, "{ALERT_RULE}");
    body.push_str("Smart Agriculture Monitoring System");
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Severity, ThresholdKind};
    use crate::sensors::Reading;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_event() -> AlertEvent {
        AlertEvent {
            metric: MetricKind::Temperature,
            severity: Severity::Critical,
            value: 36.2,
            threshold_kind: ThresholdKind::Max,
            threshold_value: 35.0,
            message: "Temperature is above critical threshold: 36.2°C (threshold: 35.0°C)"
                .to_string(),
        }
    }

    #[test]
    fn test_envelope_serialization_is_compact() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let envelope = Envelope::new(json!({"humidity": 55.0}), "dev-1", Some("field"), ts);

        let payload = envelope.to_payload().unwrap();
        assert!(!payload.contains(' '));
        assert!(payload.contains(r#""location":"field""#));
        assert!(payload.contains(r#""epoch":1717243200.0"#));

        let parsed: Envelope<Value> = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed.timestamp, ts);
    }

    #[test]
    fn test_envelope_omits_missing_location() {
        let envelope = Envelope::new(json!({}), "dev-1", None, Utc::now());
        let payload = envelope.to_payload().unwrap();
        assert!(!payload.contains("location"));
    }

    #[test]
    fn test_status_details_are_flattened() {
        let mut details = Map::new();
        details.insert("sensors".to_string(), json!(["dht22"]));
        details.insert("status".to_string(), json!("hijacked"));

        let data = StatusData::new(DeviceStatus::Online, "dev-1", 12.5).with_details(details);
        let value = serde_json::to_value(&data).unwrap();

        assert_eq!(value["status"], "online");
        assert_eq!(value["sensors"], json!(["dht22"]));
        assert_eq!(value["uptime_seconds"], 12.5);
    }

    #[test]
    fn test_last_will_announces_offline() {
        let payload = last_will_payload("dev-1").unwrap();
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["data"]["status"], "offline");
        assert_eq!(value["device_id"], "dev-1");
    }

    #[test]
    fn test_alert_body_layout() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 5).unwrap();
        let body = format_alert_body(&sample_event(), "farm-001", ts, None);

        assert!(body.contains("AGRICULTURE ALERT - CRITICAL"));
        assert!(body.contains("Device: farm-001"));
        assert!(body.contains("Time: 2024-06-01 12:30:05 UTC"));
        assert!(body.contains("Type: Temperature"));
        assert!(body.contains("ALERT: Temperature is above critical threshold"));
        assert!(!body.contains("Current Readings"));
        assert!(body.ends_with("Smart Agriculture Monitoring System"));
    }

    #[test]
    fn test_alert_body_lists_current_readings() {
        let sample: Sample = vec![
            Reading::new(MetricKind::Temperature, 36.23),
            Reading::new(MetricKind::SoilMoisture, 41.0),
        ]
        .into_iter()
        .collect();

        let body = format_alert_body(&sample_event(), "farm-001", Utc::now(), Some(&sample));

        assert!(body.contains("Current Readings:"));
        assert!(body.contains("   Temperature: 36.2°C"));
        assert!(body.contains("   Soil Moisture: 41.0%"));
        assert!(!body.contains("Humidity:"));
    }
}

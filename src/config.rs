//! Monitor configuration
//!
//! A single TOML file describes the device, the broker connection, publishing
//! cadence, simulation ranges, logging, and alert thresholds. Certificate
//! paths are resolved relative to the directory holding the config file.

use crate::alerts::{AlertSettings, MetricThresholds, ThresholdSpec};
use crate::sensors::SoilCalibration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    pub device: DeviceSection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub publishing: PublishingSection,
    #[serde(default)]
    pub simulation: SimulationSection,
    #[serde(default)]
    pub sensors: SensorsSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub alerts: AlertSettings,
    /// Per-metric bands keyed by metric name (`temperature`, `humidity`, `soil_moisture`)
    #[serde(default)]
    pub thresholds: BTreeMap<String, MetricThresholds>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier, also used as the MQTT client id (must match [a-zA-Z0-9._-]+)
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Broker endpoint and credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Hostname or `mqtt://` / `mqtts://` URL
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default = "default_root_ca")]
    pub root_ca: PathBuf,
    #[serde(default = "default_device_cert")]
    pub device_cert: PathBuf,
    #[serde(default = "default_private_key")]
    pub private_key: PathBuf,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u64,
    #[serde(default = "default_reconnect_min")]
    pub reconnect_min_secs: u64,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,
}

fn default_port() -> u16 {
    8883
}

fn default_root_ca() -> PathBuf {
    PathBuf::from("certs/AmazonRootCA1.pem")
}

fn default_device_cert() -> PathBuf {
    PathBuf::from("certs/device.pem.crt")
}

fn default_private_key() -> PathBuf {
    PathBuf::from("certs/device-private.pem.key")
}

fn default_keep_alive() -> u64 {
    30
}

fn default_ping_timeout() -> u64 {
    3000
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_publish_timeout() -> u64 {
    10
}

fn default_reconnect_min() -> u64 {
    1
}

fn default_reconnect_max() -> u64 {
    128
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            port: default_port(),
            region: None,
            root_ca: default_root_ca(),
            device_cert: default_device_cert(),
            private_key: default_private_key(),
            keep_alive_secs: default_keep_alive(),
            ping_timeout_ms: default_ping_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            publish_timeout_secs: default_publish_timeout(),
            reconnect_min_secs: default_reconnect_min(),
            reconnect_max_secs: default_reconnect_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishingSection {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Keep sampling when the initial connect fails; publishes fail fast until
    /// the transport reconnects
    #[serde(default)]
    pub continue_when_disconnected: bool,
}

fn default_interval() -> u64 {
    30
}

fn default_qos() -> u8 {
    1
}

fn default_topic_prefix() -> String {
    "agriculture/sensors".to_string()
}

impl Default for PublishingSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            qos: default_qos(),
            retain: false,
            topic_prefix: default_topic_prefix(),
            continue_when_disconnected: false,
        }
    }
}

/// Inclusive `[low, high]` range, written as a two-element array in TOML
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ValueRange(pub f64, pub f64);

impl From<ValueRange> for (f64, f64) {
    fn from(range: ValueRange) -> Self {
        (range.0, range.1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_temperature_range")]
    pub temperature_range: ValueRange,
    #[serde(default = "default_humidity_range")]
    pub humidity_range: ValueRange,
    #[serde(default = "default_soil_moisture_range")]
    pub soil_moisture_range: ValueRange,
    /// Probability in 0..=1 that a simulated read fails
    #[serde(default)]
    pub failure_rate: f64,
}

fn default_temperature_range() -> ValueRange {
    ValueRange(20.0, 35.0)
}

fn default_humidity_range() -> ValueRange {
    ValueRange(40.0, 80.0)
}

fn default_soil_moisture_range() -> ValueRange {
    ValueRange(30.0, 70.0)
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            enabled: false,
            temperature_range: default_temperature_range(),
            humidity_range: default_humidity_range(),
            soil_moisture_range: default_soil_moisture_range(),
            failure_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SensorsSection {
    #[serde(default)]
    pub soil_moisture: SoilMoistureSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SoilMoistureSection {
    #[serde(default)]
    pub calibration: SoilCalibration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub spans: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            spans: false,
        }
    }
}

/// Connection parameters handed to the session and transport. Never mutated
/// after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub port: u16,
    pub client_id: String,
    pub root_ca_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub keep_alive: Duration,
    pub ping_timeout: Duration,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl ConnectionConfig {
    /// Credential files required for a mutual-TLS connection, with display names
    pub fn credential_files(&self) -> [(&'static str, &Path); 3] {
        [
            ("Root CA", self.root_ca_path.as_path()),
            ("Device Certificate", self.cert_path.as_path()),
            ("Private Key", self.key_path.as_path()),
        ]
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid device ID format: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MonitorConfig {
    /// Load configuration from a TOML file, validate it, and resolve
    /// certificate paths against the file's directory
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_simulation(path, false)
    }

    /// Like [`load_from_file`](Self::load_from_file), but `force_simulation`
    /// enables simulation before validation, so a broker endpoint is optional
    pub fn load_with_simulation(path: &Path, force_simulation: bool) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: MonitorConfig = toml::from_str(&content)?;
        config.simulation.enabled |= force_simulation;
        config.validate()?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }

        Ok(config)
    }

    /// Parse and validate configuration without touching the filesystem
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: MonitorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.device.id)?;

        if !self.simulation.enabled && self.broker.endpoint.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "[broker] endpoint is required unless simulation is enabled".to_string(),
            ));
        }

        if self.broker.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(
                "keep_alive_secs must be at least 5".to_string(),
            ));
        }

        if self.broker.reconnect_min_secs == 0
            || self.broker.reconnect_max_secs < self.broker.reconnect_min_secs
        {
            return Err(ConfigError::InvalidConfig(format!(
                "reconnect bounds must satisfy 0 < min ({}) <= max ({})",
                self.broker.reconnect_min_secs, self.broker.reconnect_max_secs
            )));
        }

        if self.publishing.interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "publishing interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.publishing.qos > 2 {
            return Err(ConfigError::InvalidConfig(format!(
                "qos must be 0, 1 or 2, got {}",
                self.publishing.qos
            )));
        }

        if self.publishing.topic_prefix.contains(['+', '#']) {
            return Err(ConfigError::InvalidConfig(
                "topic_prefix must not contain MQTT wildcards".to_string(),
            ));
        }

        let sim = &self.simulation;
        for (name, range) in [
            ("temperature_range", sim.temperature_range),
            ("humidity_range", sim.humidity_range),
            ("soil_moisture_range", sim.soil_moisture_range),
        ] {
            if range.0 > range.1 {
                return Err(ConfigError::InvalidConfig(format!(
                    "simulation {name} low bound {} exceeds high bound {}",
                    range.0, range.1
                )));
            }
        }
        if !(0.0..=1.0).contains(&sim.failure_rate) {
            return Err(ConfigError::InvalidConfig(
                "simulation failure_rate must be within 0..=1".to_string(),
            ));
        }

        // Surfaces unknown metric names and inverted bands at load time
        self.threshold_spec()?;

        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.broker.root_ca,
            &mut self.broker.device_cert,
            &mut self.broker.private_key,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Build the validated threshold set
    pub fn threshold_spec(&self) -> Result<ThresholdSpec, ConfigError> {
        ThresholdSpec::from_parts(self.alerts.clone(), &self.thresholds)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        let broker = &self.broker;
        ConnectionConfig {
            endpoint: broker.endpoint.clone(),
            port: broker.port,
            client_id: self.device.id.clone(),
            root_ca_path: broker.root_ca.clone(),
            cert_path: broker.device_cert.clone(),
            key_path: broker.private_key.clone(),
            keep_alive: Duration::from_secs(broker.keep_alive_secs),
            ping_timeout: Duration::from_millis(broker.ping_timeout_ms),
            connect_timeout: Duration::from_secs(broker.connect_timeout_secs),
            publish_timeout: Duration::from_secs(broker.publish_timeout_secs),
            reconnect_min: Duration::from_secs(broker.reconnect_min_secs),
            reconnect_max: Duration::from_secs(broker.reconnect_max_secs),
        }
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publishing.interval_secs)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "test-device"
location = "greenhouse-a"

[broker]
endpoint = "example-ats.iot.eu-north-1.amazonaws.com"

[simulation]
enabled = true

[alerts]
cooldown_secs = 300
consecutive_readings = 2

[thresholds.temperature]
warning = { max = 30.0 }
critical = { max = 35.0 }
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Validate device ID format; the id becomes both a topic level and the MQTT client id
pub fn validate_device_id(device_id: &str) -> Result<(), ConfigError> {
    let valid_chars = device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if device_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidDeviceId(format!(
            "Device ID '{device_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

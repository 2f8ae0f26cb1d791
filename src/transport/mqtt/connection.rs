//! Pure connection configuration for the MQTT transport
//!
//! Endpoint parsing, reconnect backoff, link state, and construction of
//! rumqttc options (mutual TLS, persistent session, retained last will).

use crate::config::ConnectionConfig;
use crate::transport::TransportError;
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// State of the underlying broker link as seen by the event-loop task
#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    /// Waiting for the first ConnAck
    Connecting,
    /// ConnAck received
    Up { session_present: bool },
    /// An established link dropped
    Down(String),
    /// Backing off before reconnect attempt n
    Reconnecting(u32),
    /// The first connect never succeeded; the task has stopped
    Failed(String),
    /// Closed by the client
    Closed,
}

impl LinkState {
    pub fn is_up(&self) -> bool {
        matches!(self, LinkState::Up { .. })
    }

    /// Link was established at least once and is now recovering
    pub fn is_recovering(&self) -> bool {
        matches!(self, LinkState::Down(_) | LinkState::Reconnecting(_))
    }
}

/// Capped exponential reconnect backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(128),
        }
    }
}

impl ReconnectConfig {
    pub fn from_connection(config: &ConnectionConfig) -> Self {
        Self {
            min_delay: config.reconnect_min,
            max_delay: config.reconnect_max.max(config.reconnect_min),
        }
    }

    /// Delay before reconnect `attempt` (1-based): `min * 2^(attempt-1)`, capped at `max`
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.min_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Parsed broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse a bare hostname (TLS assumed) or an `mqtt://` / `mqtts://` URL
pub fn parse_endpoint(endpoint: &str, default_port: u16) -> Result<BrokerAddress, TransportError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(TransportError::InvalidEndpoint("empty endpoint".to_string()));
    }

    if !endpoint.contains("://") {
        if endpoint.contains(['/', ' ', '?', '#']) {
            return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
        }
        return Ok(BrokerAddress {
            host: endpoint.to_string(),
            port: default_port,
            tls: true,
        });
    }

    let url = Url::parse(endpoint)
        .map_err(|_| TransportError::InvalidEndpoint(endpoint.to_string()))?;
    let tls = match url.scheme() {
        "mqtts" | "ssl" | "tls" => true,
        "mqtt" | "tcp" => false,
        _ => return Err(TransportError::InvalidEndpoint(endpoint.to_string())),
    };
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidEndpoint(endpoint.to_string()))?;

    Ok(BrokerAddress {
        host: host.to_string(),
        port: url.port().unwrap_or(default_port),
        tls,
    })
}

/// Retained message the broker publishes if the device vanishes
#[derive(Debug, Clone, PartialEq)]
pub struct LastWillSpec {
    pub topic: String,
    pub payload: String,
}

fn read_credential(name: &'static str, path: &Path) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path).map_err(|source| TransportError::CredentialLoad {
        name,
        path: path.display().to_string(),
        source,
    })
}

/// Build rumqttc options from the connection config
///
/// TLS endpoints use mutual authentication with the configured root CA,
/// device certificate, and private key. Sessions are persistent so QoS 1
/// messages queued across a reconnect are redelivered.
pub fn configure_mqtt_options(
    config: &ConnectionConfig,
    last_will: Option<&LastWillSpec>,
) -> Result<MqttOptions, TransportError> {
    let address = parse_endpoint(&config.endpoint, config.port)?;

    let mut mqtt_options = MqttOptions::new(&config.client_id, address.host, address.port);
    mqtt_options.set_keep_alive(config.keep_alive);
    mqtt_options.set_clean_start(false);
    mqtt_options.set_connection_timeout(config.connect_timeout.as_secs().max(1));

    if address.tls {
        let ca = read_credential("Root CA", &config.root_ca_path)?;
        let cert = read_credential("Device Certificate", &config.cert_path)?;
        let key = read_credential("Private Key", &config.key_path)?;
        mqtt_options.set_transport(RumqttcTransport::tls(ca, Some((cert, key)), None));
    }

    if let Some(will) = last_will {
        let lwt = LastWill::new(
            will.topic.as_str(),
            will.payload.clone(),
            QoS::AtLeastOnce,
            true,
            None,
        );
        mqtt_options.set_last_will(lwt);
    }

    Ok(mqtt_options)
}

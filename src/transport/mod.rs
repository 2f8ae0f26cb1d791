//! Transport layer for broker communication
//!
//! The session only ever talks to a broker through the [`Transport`] trait,
//! built by a [`TransportBuilder`]. The live implementation is MQTT over
//! mutual TLS ([`mqtt::MqttTransport`]); [`simulated::SimulatedTransport`]
//! accepts everything and is used when no broker is available.
//!
//! Link interruptions and resumptions are reported asynchronously from the
//! transport's own task as [`TransportEvent`]s on an unbounded channel.

pub mod mqtt;
pub mod simulated;

use crate::config::ConnectionConfig;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub use mqtt::{MqttTransport, MqttTransportBuilder};
pub use simulated::{SimulatedTransport, SimulatedTransportBuilder};

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for Qos {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(TransportError::InvalidQos(other)),
        }
    }
}

/// Broker acknowledgement of a completed connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectAck {
    /// The broker resumed a persistent session
    pub session_present: bool,
}

/// Acknowledgement of a completed publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub message_id: Option<String>,
}

/// Asynchronous link notifications raised by the transport's own task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An established link dropped; the transport is reconnecting
    Interrupted { reason: String },
    /// The transport re-established the link after an interruption
    Resumed { session_present: bool },
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("connect timed out after {0:?} without broker acknowledgement")]
    ConnectTimeout(Duration),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("publish timed out after {0:?}")]
    PublishTimeout(Duration),
    #[error("disconnect failed: {0}")]
    DisconnectFailed(String),
    #[error("not connected")]
    NotConnected,
    #[error("invalid broker endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("invalid QoS level {0}, expected 0, 1 or 2")]
    InvalidQos(u8),
    #[error("failed to load {name} from {path}: {source}")]
    CredentialLoad {
        name: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Connection to a message broker
///
/// Implementations are shared behind `Arc` and must tolerate concurrent
/// `publish` calls; `connect`/`disconnect` are serialized by the session.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open the link and wait for the broker's acknowledgement
    async fn connect(&self) -> Result<ConnectAck, TransportError>;

    /// Close the link. Must succeed when nothing is open.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Send one message and wait until the transport accepts it
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: Qos,
        retain: bool,
    ) -> Result<PublishAck, TransportError>;

    /// Short identifier for status output, e.g. `mqtt`
    fn kind(&self) -> &'static str;
}

/// Factory for transports, invoked lazily on the first connect
pub trait TransportBuilder: Send + Sync {
    /// Names of required credential files that are missing. Local check only.
    fn missing_credentials(&self, config: &ConnectionConfig) -> Vec<String> {
        missing_credential_files(config)
    }

    /// Build a transport that reports link events on `events`
    fn build(
        &self,
        config: &ConnectionConfig,
        events: TransportEventSender,
    ) -> Result<Arc<dyn Transport>, TransportError>;

    fn kind(&self) -> &'static str;

    /// Whether connecting can be assumed to succeed, so a monitor may start
    /// without a broker
    fn always_available(&self) -> bool {
        false
    }
}

/// Credential files from `config` that do not exist on disk
pub fn missing_credential_files(config: &ConnectionConfig) -> Vec<String> {
    config
        .credential_files()
        .into_iter()
        .filter(|(_, path)| !path.is_file())
        .map(|(name, path)| format!("{name}: {}", path.display()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;

    #[test]
    fn test_qos_conversion() {
        assert_eq!(Qos::try_from(0).unwrap(), Qos::AtMostOnce);
        assert_eq!(Qos::try_from(1).unwrap(), Qos::AtLeastOnce);
        assert_eq!(Qos::try_from(2).unwrap(), Qos::ExactlyOnce);
        assert!(matches!(Qos::try_from(3), Err(TransportError::InvalidQos(3))));
    }

    #[test]
    fn test_missing_credentials_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MonitorConfig::test_config().connection_config();
        config.root_ca_path = dir.path().join("root.pem");
        config.cert_path = dir.path().join("device.crt");
        config.key_path = dir.path().join("device.key");
        std::fs::write(&config.root_ca_path, "ca").unwrap();

        let missing = missing_credential_files(&config);

        assert_eq!(missing.len(), 2);
        assert!(missing[0].starts_with("Device Certificate"));
        assert!(missing[1].starts_with("Private Key"));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(TransportError::NotConnected.to_string(), "not connected");
        assert!(TransportError::ConnectTimeout(Duration::from_secs(30))
            .to_string()
            .contains("30s"));
    }
}

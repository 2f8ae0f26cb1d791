//! Transport that accepts every operation without a network

use super::{
    ConnectAck, PublishAck, Qos, Transport, TransportBuilder, TransportError, TransportEventSender,
};
use crate::config::ConnectionConfig;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct SimulatedTransport {
    next_id: AtomicU64,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn connect(&self) -> Result<ConnectAck, TransportError> {
        info!("[SIMULATED] connected");
        Ok(ConnectAck::default())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        info!("[SIMULATED] disconnected");
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        _qos: Qos,
        _retain: bool,
    ) -> Result<PublishAck, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(topic, "[SIMULATED] publishing");
        debug!(payload = %String::from_utf8_lossy(&payload), "[SIMULATED] message");
        Ok(PublishAck {
            message_id: Some(format!("sim-{id}")),
        })
    }

    fn kind(&self) -> &'static str {
        "simulated"
    }
}

/// Builds [`SimulatedTransport`]s; needs no credentials
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedTransportBuilder;

impl TransportBuilder for SimulatedTransportBuilder {
    fn missing_credentials(&self, _config: &ConnectionConfig) -> Vec<String> {
        Vec::new()
    }

    fn build(
        &self,
        _config: &ConnectionConfig,
        _events: TransportEventSender,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(SimulatedTransport::new()))
    }

    fn kind(&self) -> &'static str {
        "simulated"
    }

    fn always_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_simulated_builder_is_always_available() {
        assert!(SimulatedTransportBuilder.always_available());

        let topics = crate::protocol::TopicBuilder::new("farm", "dev-1");
        assert!(!crate::transport::MqttTransportBuilder::new(topics).always_available());
    }

    #[tokio::test]
    async fn test_simulated_publish_numbers_messages() {
        let transport = SimulatedTransport::new();
        transport.connect().await.unwrap();

        let first = transport
            .publish("a/b", Bytes::from_static(b"{}"), Qos::AtLeastOnce, false)
            .await
            .unwrap();
        let second = transport
            .publish("a/b", Bytes::from_static(b"{}"), Qos::AtLeastOnce, false)
            .await
            .unwrap();

        assert_eq!(first.message_id.as_deref(), Some("sim-1"));
        assert_eq!(second.message_id.as_deref(), Some("sim-2"));
    }

    #[test]
    fn test_simulated_builder_needs_no_credentials() {
        let config = crate::config::MonitorConfig::test_config().connection_config();
        assert!(SimulatedTransportBuilder.missing_credentials(&config).is_empty());
    }
}

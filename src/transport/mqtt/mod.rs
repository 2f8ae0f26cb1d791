//! MQTT transport over rumqttc
//!
//! Pure logic is kept apart from I/O:
//!
//! - [`connection`] - endpoint parsing, backoff, and rumqttc option building
//! - [`health_monitor`] - link state transitions and interrupt/resume edges
//! - [`message_handler`] - routing of rumqttc events
//! - [`client`] - the transport itself and its event-loop task
//!
//! # Usage
//!
//! ```rust,no_run
//! use fieldmon::config::MonitorConfig;
//! use fieldmon::protocol::TopicBuilder;
//! use fieldmon::transport::{MqttTransportBuilder, TransportBuilder};
//! use std::path::Path;
//!
//! # tokio_test::block_on(async {
//! let config = MonitorConfig::load_from_file(Path::new("config/fieldmon.toml"))?;
//! let topics = TopicBuilder::new(&config.publishing.topic_prefix, &config.device.id);
//! let (events, _rx) = tokio::sync::mpsc::unbounded_channel();
//!
//! let transport = MqttTransportBuilder::new(topics).build(&config.connection_config(), events)?;
//! transport.connect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::{MqttTransport, MqttTransportBuilder};
pub use connection::{
    configure_mqtt_options, parse_endpoint, BrokerAddress, LastWillSpec, LinkState,
    ReconnectConfig,
};
pub use health_monitor::{HealthMonitor, LinkEvent};
pub use message_handler::{EventRoute, MessageHandler};

//! Field sensor monitor
//!
//! Periodically samples environmental sensors, evaluates readings against
//! debounced thresholds, and forwards telemetry, status and alerts to an MQTT
//! broker over a link that is expected to drop.
//!
//! # Overview
//!
//! - [`sensors`] - readings, validation and the simulated source
//! - [`alerts`] - the threshold engine (consecutive confirmation plus cooldown)
//! - [`session`] - the connection lifecycle state machine
//! - [`transport`] - the broker seam, with rumqttc and simulated implementations
//! - [`publisher`] - payload formatting and publish counters
//! - [`monitor`] - the read/publish/evaluate loop
//!
//! # Quick Start
//!
//! ```rust
//! use fieldmon::alerts::{AlertEngine, AlertSettings, Band, MetricThresholds, ThresholdSpec};
//! use fieldmon::sensors::MetricKind;
//!
//! let spec = ThresholdSpec::new(AlertSettings::default())
//!     .with_metric(
//!         MetricKind::Temperature,
//!         MetricThresholds {
//!             warning: Some(Band::new(None, Some(30.0))),
//!             critical: Some(Band::new(None, Some(35.0))),
//!             ..Default::default()
//!         },
//!     )
//!     .unwrap();
//! let mut engine = AlertEngine::new(spec);
//!
//! assert!(engine.evaluate(MetricKind::Temperature, 31.0).is_none());
//! let alert = engine.evaluate(MetricKind::Temperature, 31.0).unwrap();
//! assert_eq!(alert.message, "Temperature is above warning threshold: 31.0°C (threshold: 30.0°C)");
//! ```

pub mod alerts;
pub mod config;
pub mod error;
pub mod monitor;
pub mod observability;
pub mod protocol;
pub mod publisher;
pub mod sensors;
pub mod session;
pub mod testing;
pub mod transport;

pub use alerts::{AlertEngine, AlertEvent, Severity, ThresholdSpec};
pub use config::{ConfigError, ConnectionConfig, MonitorConfig};
pub use error::{MonitorError, MonitorResult};
pub use monitor::{MonitorLoop, RunOptions, RunSummary, StopHandle};
pub use publisher::{PublishResult, Publisher, PublisherMetrics};
pub use sensors::{MetricKind, Reading, ReadingSource, Sample};
pub use session::{ConnectionSession, ConnectionState, ConnectionStatus};
pub use transport::{Transport, TransportBuilder};

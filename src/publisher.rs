//! Outbound payloads: telemetry, status and alerts
//!
//! The publisher formats each message, checks the session before sending, and
//! keeps success/error counters. A publish never returns an error; every
//! failure is folded into a [`PublishResult`] with `success == false`.

use crate::alerts::AlertEvent;
use crate::error::sanitize_error_message;
use crate::protocol::{
    format_alert_body, DeviceStatus, Envelope, StatusData, TopicBuilder, TopicSet,
};
use crate::publish_span;
use crate::sensors::Sample;
use crate::session::ConnectionSession;
use crate::transport::{Qos, TransportError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, warn, Instrument};

/// Outcome of one publish
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishResult {
    pub success: bool,
    pub topic: String,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Counter snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublisherMetrics {
    pub publish_count: u64,
    pub error_count: u64,
    /// `publish_count / (publish_count + error_count)`, 0.0 before any attempt
    pub success_rate: f64,
    pub last_publish_time: Option<DateTime<Utc>>,
}

pub struct Publisher {
    session: Arc<ConnectionSession>,
    topics: TopicBuilder,
    location: Option<String>,
    qos: Qos,
    retain: bool,
    started: Instant,
    publish_count: AtomicU64,
    error_count: AtomicU64,
    last_publish_time: Mutex<Option<DateTime<Utc>>>,
}

impl Publisher {
    pub fn new(
        session: Arc<ConnectionSession>,
        topics: TopicBuilder,
        location: Option<String>,
        qos: Qos,
        retain: bool,
    ) -> Self {
        Self {
            session,
            topics,
            location,
            qos,
            retain,
            started: Instant::now(),
            publish_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_publish_time: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Arc<ConnectionSession> {
        &self.session
    }

    pub fn topics(&self) -> TopicSet {
        self.topics.topic_set()
    }

    fn envelope<T: Serialize>(&self, data: T, timestamp: DateTime<Utc>) -> Envelope<T> {
        Envelope::new(
            data,
            self.topics.device_id(),
            self.location.as_deref(),
            timestamp,
        )
    }

    /// Publish the valid readings of one tick as a JSON object keyed by metric
    pub async fn publish_telemetry(&self, sample: &Sample) -> PublishResult {
        let timestamp = Utc::now();
        let topic = self.topics.telemetry();
        let payload = self.envelope(sample.values(), timestamp).to_payload();
        self.send(topic, payload, self.retain, timestamp).await
    }

    /// Publish a device status. Status messages are always retained so they
    /// supersede the broker-held last will.
    pub async fn publish_status(
        &self,
        status: DeviceStatus,
        details: Option<Map<String, Value>>,
    ) -> PublishResult {
        let timestamp = Utc::now();
        let topic = self.topics.status();
        let uptime = self.started.elapsed().as_secs_f64();
        let data = StatusData::new(status, self.topics.device_id(), uptime)
            .with_details(details.unwrap_or_default());
        let payload = self.envelope(data, timestamp).to_payload();
        self.send(topic, payload, true, timestamp).await
    }

    pub async fn publish_alert(&self, event: &AlertEvent) -> PublishResult {
        self.publish_alert_inner(event, None).await
    }

    /// Alert body with a "Current Readings" section appended
    pub async fn publish_alert_with_readings(
        &self,
        event: &AlertEvent,
        sample: &Sample,
    ) -> PublishResult {
        self.publish_alert_inner(event, Some(sample)).await
    }

    async fn publish_alert_inner(&self, event: &AlertEvent, sample: Option<&Sample>) -> PublishResult {
        let timestamp = Utc::now();
        let topic = self.topics.alerts();
        let body = format_alert_body(event, self.topics.device_id(), timestamp, sample);
        self.send(topic, Ok(body), self.retain, timestamp).await
    }

    async fn send(
        &self,
        topic: String,
        payload: Result<String, serde_json::Error>,
        retain: bool,
        timestamp: DateTime<Utc>,
    ) -> PublishResult {
        let span = publish_span!(topic = %topic);
        async move {
            if !self.session.is_connected() {
                return self.failed(topic, &TransportError::NotConnected, timestamp);
            }

            let payload = match payload {
                Ok(payload) => payload,
                Err(e) => return self.failed(topic, &TransportError::from(e), timestamp),
            };

            match self
                .session
                .publish(&topic, Bytes::from(payload), self.qos, retain)
                .await
            {
                Ok(ack) => {
                    self.publish_count.fetch_add(1, Ordering::Relaxed);
                    if let Ok(mut last) = self.last_publish_time.lock() {
                        *last = Some(timestamp);
                    }
                    debug!(message_id = ?ack.message_id, "published");
                    PublishResult {
                        success: true,
                        topic,
                        message_id: ack.message_id,
                        error: None,
                        timestamp,
                    }
                }
                Err(e) => self.failed(topic, &e, timestamp),
            }
        }
        .instrument(span)
        .await
    }

    fn failed(&self, topic: String, error: &TransportError, timestamp: DateTime<Utc>) -> PublishResult {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        let error = sanitize_error_message(&error.to_string());
        warn!(%topic, %error, "publish failed");
        PublishResult {
            success: false,
            topic,
            message_id: None,
            error: Some(error),
            timestamp,
        }
    }

    pub fn get_metrics(&self) -> PublisherMetrics {
        let publish_count = self.publish_count.load(Ordering::Relaxed);
        let error_count = self.error_count.load(Ordering::Relaxed);
        let attempts = publish_count + error_count;
        let success_rate = if attempts == 0 {
            0.0
        } else {
            publish_count as f64 / attempts as f64
        };

        PublisherMetrics {
            publish_count,
            error_count,
            success_rate,
            last_publish_time: self.last_publish_time.lock().ok().and_then(|t| *t),
        }
    }
}

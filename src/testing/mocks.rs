//! Mock implementations for testing
//!
//! Provides a mock transport (with its builder), a scripted reading source and
//! a recording session observer, so sessions, publishers and the monitor loop
//! can be exercised without a broker or sensor hardware.

use crate::config::ConnectionConfig;
use crate::sensors::{MetricKind, Reading, ReadingSource};
use crate::session::{ConnectError, ConnectionStatus, SessionObserver};
use crate::transport::{
    ConnectAck, PublishAck, Qos, Transport, TransportBuilder, TransportError, TransportEvent,
    TransportEventSender,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One message handed to [`MockTransport::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or_default()
    }

    pub fn payload_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    published: Mutex<Vec<PublishedMessage>>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    publish_calls: AtomicUsize,
    fail_connect: AtomicBool,
    fail_publish: AtomicBool,
    drop_link_on_connect: Mutex<Option<String>>,
    events: Mutex<Option<TransportEventSender>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make the next successful connect report the link as dropped before
    /// the acknowledgement is returned
    pub fn drop_link_during_connect(&self, reason: &str) {
        if let Ok(mut slot) = self.drop_link_on_connect.lock() {
            *slot = Some(reason.to_string());
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Publish calls that reached the transport, failed ones included
    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    pub fn clear_history(&self) {
        if let Ok(mut published) = self.published.lock() {
            published.clear();
        }
    }

    /// Raise a link notification the way the transport's own task would.
    /// Returns false if the transport has not been built into a session yet.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events
            .lock()
            .ok()
            .and_then(|events| events.as_ref().map(|tx| tx.send(event).is_ok()))
            .unwrap_or(false)
    }

    fn attach(&self, events: TransportEventSender) {
        if let Ok(mut slot) = self.events.lock() {
            *slot = Some(events);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<ConnectAck, TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed(
                "mock broker refused connection".to_string(),
            ));
        }

        let dropped = self
            .drop_link_on_connect
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(reason) = dropped {
            self.emit(TransportEvent::Interrupted { reason });
            // Let the session's listener see the event before the ack
            tokio::task::yield_now().await;
        }
        Ok(ConnectAck::default())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: Qos,
        retain: bool,
    ) -> Result<PublishAck, TransportError> {
        let n = self.publish_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed(
                "mock broker dropped the message".to_string(),
            ));
        }

        if let Ok(mut published) = self.published.lock() {
            published.push(PublishedMessage {
                topic: topic.to_string(),
                payload,
                qos,
                retain,
            });
        }
        Ok(PublishAck {
            message_id: Some(format!("mock-{n}")),
        })
    }

    fn kind(&self) -> &'static str {
        "mock"
    }
}

/// Builder that always hands out the same [`MockTransport`]
#[derive(Debug, Default)]
pub struct MockTransportBuilder {
    transport: Arc<MockTransport>,
    missing: Vec<String>,
    always_available: bool,
}

impl MockTransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report these credential files as missing on every connect
    pub fn with_missing_credentials<I, S>(mut self, missing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.missing = missing.into_iter().map(Into::into).collect();
        self
    }

    /// Advertise the transport as never needing a reachable broker
    pub fn always_available(mut self) -> Self {
        self.always_available = true;
        self
    }

    pub fn transport(&self) -> Arc<MockTransport> {
        Arc::clone(&self.transport)
    }
}

impl TransportBuilder for MockTransportBuilder {
    fn missing_credentials(&self, _config: &ConnectionConfig) -> Vec<String> {
        self.missing.clone()
    }

    fn build(
        &self,
        _config: &ConnectionConfig,
        events: TransportEventSender,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        self.transport.attach(events);
        Ok(self.transport.clone())
    }

    fn always_available(&self) -> bool {
        self.always_available
    }

    fn kind(&self) -> &'static str {
        "mock"
    }
}

/// Reading source that replays fixed values per metric
///
/// Once a metric's script runs out its last value repeats. A `NAN` entry
/// produces a failed reading.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    scripts: BTreeMap<MetricKind, VecDeque<f64>>,
    last: BTreeMap<MetricKind, f64>,
    closed: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(mut self, metric: MetricKind, values: impl IntoIterator<Item = f64>) -> Self {
        self.scripts.insert(metric, values.into_iter().collect());
        self
    }

    /// Flag set once `close` has been called; observable after the source is moved
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl ReadingSource for ScriptedSource {
    fn metrics(&self) -> Vec<MetricKind> {
        self.scripts.keys().copied().collect()
    }

    fn read(&mut self, metric: MetricKind) -> Reading {
        let next = self
            .scripts
            .get_mut(&metric)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.last.get(&metric).copied());

        match next {
            Some(value) if value.is_nan() => Reading::failed(metric, "scripted failure"),
            Some(value) => {
                self.last.insert(metric, value);
                Reading::new(metric, value)
            }
            None => Reading::failed(metric, "no scripted value"),
        }
    }

    fn sensor_names(&self) -> Vec<String> {
        vec!["scripted".to_string()]
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Session observer that records every callback
#[derive(Debug, Default)]
pub struct RecordingObserver {
    connected: AtomicUsize,
    connect_failures: AtomicUsize,
    interruptions: Mutex<Vec<String>>,
    resumptions: AtomicUsize,
}

impl RecordingObserver {
    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connect_failures(&self) -> usize {
        self.connect_failures.load(Ordering::SeqCst)
    }

    pub fn interruptions(&self) -> Vec<String> {
        self.interruptions
            .lock()
            .map(|i| i.clone())
            .unwrap_or_default()
    }

    pub fn resumptions(&self) -> usize {
        self.resumptions.load(Ordering::SeqCst)
    }
}

impl SessionObserver for RecordingObserver {
    fn on_connected(&self, _status: &ConnectionStatus) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connect_failed(&self, _error: &ConnectError) {
        self.connect_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_interrupted(&self, reason: &str) {
        if let Ok(mut interruptions) = self.interruptions.lock() {
            interruptions.push(reason.to_string());
        }
    }

    fn on_resumed(&self, _session_present: bool) {
        self.resumptions.fetch_add(1, Ordering::SeqCst);
    }
}

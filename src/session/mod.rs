//! Connection session: the lifecycle of one logical broker connection
//!
//! [`ConnectionSession`] owns the [`ConnectionState`]. Every mutation goes
//! through [`state::next_state`] under one mutex that is never held across an
//! `.await`; the current state is mirrored into a `watch` channel.
//!
//! The transport is built lazily on the first connect. Its interrupt/resume
//! notifications arrive on a channel drained by a listener task, which applies
//! them through the same mutation path and then tells the [`SessionObserver`].

pub mod state;

use crate::config::ConnectionConfig;
use crate::session_span;
use crate::transport::{
    PublishAck, Qos, Transport, TransportBuilder, TransportError, TransportEvent,
};
use bytes::Bytes;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

pub use state::{next_state, ConnectionState, ConnectionStatus, SessionEvent};

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("missing credentials: {}", .0.join(", "))]
    CredentialsMissing(Vec<String>),
    #[error("a connect attempt is already in progress")]
    InProgress,
    #[error("connect aborted by a concurrent disconnect")]
    Aborted,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum DisconnectError {
    #[error("transport disconnect failed: {0}")]
    Transport(#[from] TransportError),
}

/// Callbacks for session lifecycle edges
///
/// Interrupt/resume callbacks run on the session's listener task, concurrently
/// with the caller of `connect`/`publish`.
pub trait SessionObserver: Send + Sync {
    fn on_connected(&self, _status: &ConnectionStatus) {}
    fn on_connect_failed(&self, _error: &ConnectError) {}
    fn on_interrupted(&self, _reason: &str) {}
    fn on_resumed(&self, _session_present: bool) {}
}

/// Observer that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn on_connected(&self, status: &ConnectionStatus) {
        info!(
            endpoint = %status.endpoint,
            client_id = %status.client_id,
            attempts = status.attempt_count,
            "Connected to broker"
        );
    }

    fn on_connect_failed(&self, error: &ConnectError) {
        error!(error = %error, "Connection failed");
    }

    fn on_interrupted(&self, reason: &str) {
        warn!(%reason, "Connection interrupted");
    }

    fn on_resumed(&self, session_present: bool) {
        info!(session_present, "Connection resumed");
    }
}

struct SessionInner {
    state: ConnectionState,
    attempt_count: u32,
    last_connect: Option<chrono::DateTime<Utc>>,
    last_disconnect: Option<chrono::DateTime<Utc>>,
    transport: Option<Arc<dyn Transport>>,
    /// Interruption reported by the transport before the connect attempt resolved
    pending_interrupt: Option<String>,
}

/// State shared between the session handle and its listener task
struct SessionShared {
    config: ConnectionConfig,
    transport_kind: &'static str,
    inner: Mutex<SessionInner>,
    state_tx: watch::Sender<ConnectionState>,
    observer: Arc<dyn SessionObserver>,
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self, inner: &SessionInner) -> ConnectionStatus {
        ConnectionStatus {
            state: inner.state,
            attempt_count: inner.attempt_count,
            last_connect: inner.last_connect,
            last_disconnect: inner.last_disconnect,
            endpoint: self.config.endpoint.clone(),
            client_id: self.config.client_id.clone(),
            transport: self.transport_kind,
        }
    }

    /// The single mutation path. Returns the new status, or the unchanged
    /// state when the event is out of order.
    fn transition(&self, event: SessionEvent) -> Result<ConnectionStatus, ConnectionState> {
        let mut inner = self.lock();
        self.transition_locked(&mut inner, event)
    }

    fn transition_locked(
        &self,
        inner: &mut SessionInner,
        event: SessionEvent,
    ) -> Result<ConnectionStatus, ConnectionState> {
        let current = inner.state;
        let next = next_state(current, event).ok_or(current)?;

        let now = Utc::now();
        match event {
            SessionEvent::ConnectAttempt | SessionEvent::ConnectFailed { .. } => {
                inner.pending_interrupt = None
            }
            SessionEvent::ConnectSucceeded => {
                inner.last_connect = Some(now);
                inner.attempt_count = inner.attempt_count.saturating_add(1);
            }
            SessionEvent::Resumed => inner.last_connect = Some(now),
            SessionEvent::Interrupted => inner.last_disconnect = Some(now),
            SessionEvent::Disconnected => {
                inner.pending_interrupt = None;
                if current != ConnectionState::Disconnected {
                    inner.last_disconnect = Some(now);
                }
            }
        }

        inner.state = next;
        self.state_tx.send_replace(next);
        if current != next {
            debug!(from = %current, to = %next, ?event, "session state transition");
        }
        Ok(self.snapshot(inner))
    }

    /// Move a resolved attempt to Connected, then straight on to Interrupted
    /// when the link already dropped while the attempt was in flight.
    ///
    /// Returns the status at Connected, the final status and the deferred
    /// interruption reason.
    fn finish_connect(
        &self,
    ) -> Result<(ConnectionStatus, ConnectionStatus, Option<String>), ConnectionState> {
        let mut inner = self.lock();
        let connected = self.transition_locked(&mut inner, SessionEvent::ConnectSucceeded)?;
        match inner.pending_interrupt.take() {
            Some(reason) => {
                let interrupted =
                    self.transition_locked(&mut inner, SessionEvent::Interrupted)?;
                Ok((connected, interrupted, Some(reason)))
            }
            None => Ok((connected.clone(), connected, None)),
        }
    }

    /// Hold link notifications that race ahead of the connect acknowledgement.
    /// Returns true when the event was deferred.
    fn defer_while_connecting(&self, event: &TransportEvent) -> bool {
        let mut inner = self.lock();
        if inner.state != ConnectionState::Connecting {
            return false;
        }
        match event {
            TransportEvent::Interrupted { reason } => {
                inner.pending_interrupt = Some(reason.clone())
            }
            TransportEvent::Resumed { .. } => inner.pending_interrupt = None,
        }
        debug!(?event, "deferring transport notification until connect resolves");
        true
    }

    fn apply_transport_event(&self, event: TransportEvent) {
        if self.defer_while_connecting(&event) {
            return;
        }

        let session_event = match &event {
            TransportEvent::Interrupted { .. } => SessionEvent::Interrupted,
            TransportEvent::Resumed { .. } => SessionEvent::Resumed,
        };

        match self.transition(session_event) {
            Ok(_) => match event {
                TransportEvent::Interrupted { reason } => self.observer.on_interrupted(&reason),
                TransportEvent::Resumed { session_present } => {
                    self.observer.on_resumed(session_present)
                }
            },
            Err(state) => {
                warn!(?event, %state, "ignoring out-of-order transport notification");
            }
        }
    }
}

/// One logical publish session against a broker
pub struct ConnectionSession {
    shared: Arc<SessionShared>,
    builder: Arc<dyn TransportBuilder>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSession {
    pub fn new(config: ConnectionConfig, builder: Arc<dyn TransportBuilder>) -> Self {
        Self::with_observer(config, builder, Arc::new(LoggingObserver))
    }

    pub fn with_observer(
        config: ConnectionConfig,
        builder: Arc<dyn TransportBuilder>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let shared = SessionShared {
            config,
            transport_kind: builder.kind(),
            inner: Mutex::new(SessionInner {
                state: ConnectionState::Disconnected,
                attempt_count: 0,
                last_connect: None,
                last_disconnect: None,
                transport: None,
                pending_interrupt: None,
            }),
            state_tx,
            observer,
        };

        Self {
            shared: Arc::new(shared),
            builder,
            listener: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        let inner = self.shared.lock();
        self.shared.snapshot(&inner)
    }

    /// Whether the transport behind this session never needs a reachable broker
    pub fn transport_always_available(&self) -> bool {
        self.builder.always_available()
    }

    /// Receiver that observes every state change
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Apply an interrupt/resume notification as if it came from the transport
    pub fn apply_transport_event(&self, event: TransportEvent) {
        self.shared.apply_transport_event(event);
    }

    fn ensure_transport(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let mut inner = self.shared.lock();
        if let Some(transport) = &inner.transport {
            return Ok(Arc::clone(transport));
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport = self.builder.build(&self.shared.config, events_tx)?;
        inner.transport = Some(Arc::clone(&transport));

        let shared = Arc::clone(&self.shared);
        let listener = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                shared.apply_transport_event(event);
            }
            debug!("transport event channel closed");
        });
        *self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(listener);

        info!(transport = transport.kind(), "transport built");
        Ok(transport)
    }

    fn fail(&self, error: ConnectError) -> ConnectError {
        self.shared.observer.on_connect_failed(&error);
        error
    }

    /// Connect to the broker
    ///
    /// Returns the current status without touching the transport when already
    /// connected. A failed attempt restores the previous state and is not retried.
    /// If the link dropped before the attempt resolved, the returned status is
    /// already `Interrupted`.
    pub async fn connect(&self) -> Result<ConnectionStatus, ConnectError> {
        let span = session_span!(op = "connect", client_id = %self.shared.config.client_id);
        self.connect_attempt().instrument(span).await
    }

    async fn connect_attempt(&self) -> Result<ConnectionStatus, ConnectError> {
        let restore = {
            let inner = self.shared.lock();
            match inner.state {
                ConnectionState::Connected => return Ok(self.shared.snapshot(&inner)),
                ConnectionState::Connecting => return Err(ConnectError::InProgress),
                state => state,
            }
        };

        let missing = self.builder.missing_credentials(&self.shared.config);
        if !missing.is_empty() {
            return Err(self.fail(ConnectError::CredentialsMissing(missing)));
        }

        let transport = self
            .ensure_transport()
            .map_err(|e| self.fail(ConnectError::Transport(e)))?;

        if self.shared.transition(SessionEvent::ConnectAttempt).is_err() {
            return Err(ConnectError::InProgress);
        }
        info!(
            endpoint = %self.shared.config.endpoint,
            client_id = %self.shared.config.client_id,
            "Connecting to broker"
        );

        match transport.connect().await {
            Ok(ack) => match self.shared.finish_connect() {
                Ok((connected, status, deferred)) => {
                    debug!(session_present = ack.session_present, "broker acknowledged connect");
                    self.shared.observer.on_connected(&connected);
                    if let Some(reason) = deferred {
                        self.shared.observer.on_interrupted(&reason);
                    }
                    Ok(status)
                }
                Err(_) => {
                    let _ = transport.disconnect().await;
                    Err(self.fail(ConnectError::Aborted))
                }
            },
            Err(e) => {
                let _ = self
                    .shared
                    .transition(SessionEvent::ConnectFailed { restore });
                Err(self.fail(ConnectError::Transport(e)))
            }
        }
    }

    /// Disconnect from the broker. Succeeds trivially when already disconnected.
    pub async fn disconnect(&self) -> Result<(), DisconnectError> {
        let span = session_span!(op = "disconnect", client_id = %self.shared.config.client_id);
        self.disconnect_inner().instrument(span).await
    }

    async fn disconnect_inner(&self) -> Result<(), DisconnectError> {
        let (state, transport) = {
            let inner = self.shared.lock();
            (inner.state, inner.transport.clone())
        };

        let result = match &transport {
            Some(transport) => transport.disconnect().await,
            None => Ok(()),
        };

        let _ = self.shared.transition(SessionEvent::Disconnected);
        if state != ConnectionState::Disconnected {
            info!("Disconnected from broker");
        }

        result.map_err(DisconnectError::from)
    }

    /// Send through the transport. Fails fast with `NotConnected` unless the
    /// session is `Connected`.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: Qos,
        retain: bool,
    ) -> Result<PublishAck, TransportError> {
        let transport = {
            let inner = self.shared.lock();
            match (&inner.state, &inner.transport) {
                (ConnectionState::Connected, Some(transport)) => Arc::clone(transport),
                _ => return Err(TransportError::NotConnected),
            }
        };
        transport.publish(topic, payload, qos, retain).await
    }

    /// Health probe that leaves the session as it found it
    ///
    /// Connected reports true and Interrupted reports false, both without
    /// touching the transport. From Disconnected it connects, reports the
    /// outcome, and disconnects again.
    pub async fn test_connection(&self) -> bool {
        match self.state() {
            ConnectionState::Connected => true,
            ConnectionState::Interrupted | ConnectionState::Connecting => false,
            ConnectionState::Disconnected => {
                let connected = self.connect().await.is_ok();
                if connected {
                    if let Err(e) = self.disconnect().await {
                        warn!(error = %e, "disconnect after connection test failed");
                    }
                }
                connected
            }
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::testing::mocks::{MockTransportBuilder, RecordingObserver};
    use crate::transport::SimulatedTransportBuilder;
    use std::time::Duration;

    fn config() -> ConnectionConfig {
        MonitorConfig::test_config().connection_config()
    }

    async fn wait_for_state(session: &ConnectionSession, want: ConnectionState) {
        let mut rx = session.state_changes();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
            .await
            .expect("state change in time")
            .expect("watch open");
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        // Arrange
        let builder = MockTransportBuilder::new();
        let mock = builder.transport();
        let session = ConnectionSession::new(config(), Arc::new(builder));

        // Act
        let status = session.connect().await.unwrap();

        // Assert
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.attempt_count, 1);
        assert!(status.last_connect.is_some());
        assert_eq!(status.transport, "mock");
        assert_eq!(mock.connect_calls(), 1);

        session.disconnect().await.unwrap();
        let status = session.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.last_disconnect.is_some());
        assert_eq!(mock.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_connect_when_connected_skips_transport() {
        let builder = MockTransportBuilder::new();
        let mock = builder.transport();
        let session = ConnectionSession::new(config(), Arc::new(builder));

        session.connect().await.unwrap();
        let status = session.connect().await.unwrap();

        assert_eq!(status.attempt_count, 1);
        assert_eq!(mock.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_credentials_never_builds_transport() {
        // Arrange
        let builder = MockTransportBuilder::new().with_missing_credentials(vec!["Root CA"]);
        let mock = builder.transport();
        let observer = Arc::new(RecordingObserver::default());
        let session =
            ConnectionSession::with_observer(config(), Arc::new(builder), observer.clone());

        // Act
        let result = session.connect().await;

        // Assert
        assert!(matches!(result, Err(ConnectError::CredentialsMissing(ref m)) if m.len() == 1));
        assert_eq!(mock.connect_calls(), 0);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(observer.connect_failures(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_restores_state_and_fires_callback() {
        let builder = MockTransportBuilder::new();
        let mock = builder.transport();
        mock.fail_connect(true);
        let observer = Arc::new(RecordingObserver::default());
        let session =
            ConnectionSession::with_observer(config(), Arc::new(builder), observer.clone());

        let result = session.connect().await;

        assert!(matches!(result, Err(ConnectError::Transport(_))));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.status().attempt_count, 0);
        assert_eq!(observer.connect_failures(), 1);
        assert_eq!(mock.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let session = ConnectionSession::new(config(), Arc::new(SimulatedTransportBuilder));

        assert!(session.disconnect().await.is_ok());
        assert!(session.disconnect().await.is_ok());
        assert_eq!(session.status().last_disconnect, None);
    }

    #[tokio::test]
    async fn test_publish_while_disconnected_fails_fast() {
        let builder = MockTransportBuilder::new();
        let mock = builder.transport();
        let session = ConnectionSession::new(config(), Arc::new(builder));

        let result = session
            .publish("t", Bytes::from_static(b"x"), Qos::AtLeastOnce, false)
            .await;

        assert!(matches!(result, Err(TransportError::NotConnected)));
        assert_eq!(mock.publish_calls(), 0);
    }

    #[tokio::test]
    async fn test_transport_notifications_drive_state() {
        // Arrange
        let builder = MockTransportBuilder::new();
        let mock = builder.transport();
        let observer = Arc::new(RecordingObserver::default());
        let session =
            ConnectionSession::with_observer(config(), Arc::new(builder), observer.clone());
        session.connect().await.unwrap();

        // Act
        mock.emit(TransportEvent::Interrupted {
            reason: "link lost".to_string(),
        });
        wait_for_state(&session, ConnectionState::Interrupted).await;

        // Assert
        assert!(!session.is_connected());
        assert!(session.status().last_disconnect.is_some());
        assert_eq!(observer.interruptions(), vec!["link lost".to_string()]);

        mock.emit(TransportEvent::Resumed {
            session_present: true,
        });
        wait_for_state(&session, ConnectionState::Connected).await;
        assert_eq!(observer.resumptions(), 1);
    }

    #[tokio::test]
    async fn test_link_drop_during_connect_leaves_session_interrupted() {
        // Arrange: the link drops after the ack but before connect returns
        let builder = MockTransportBuilder::new();
        let mock = builder.transport();
        mock.drop_link_during_connect("dropped");
        let observer = Arc::new(RecordingObserver::default());
        let session =
            ConnectionSession::with_observer(config(), Arc::new(builder), observer.clone());

        // Act
        let status = session.connect().await.unwrap();
        wait_for_state(&session, ConnectionState::Interrupted).await;

        // Assert
        assert_eq!(status.state, ConnectionState::Interrupted);
        assert_eq!(status.attempt_count, 1);
        assert!(!session.is_connected());
        assert_eq!(observer.connected(), 1);
        assert_eq!(observer.interruptions(), vec!["dropped".to_string()]);

        let result = session
            .publish("t/x", Bytes::from_static(b"{}"), Qos::AtLeastOnce, false)
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
        assert_eq!(mock.publish_calls(), 0);

        // The later resume restores the session
        mock.emit(TransportEvent::Resumed {
            session_present: true,
        });
        wait_for_state(&session, ConnectionState::Connected).await;
        assert_eq!(observer.resumptions(), 1);
    }

    #[test]
    fn test_notification_during_connecting_is_deferred() {
        let session = ConnectionSession::new(config(), Arc::new(SimulatedTransportBuilder));
        let shared = &session.shared;
        shared.transition(SessionEvent::ConnectAttempt).unwrap();

        shared.apply_transport_event(TransportEvent::Interrupted {
            reason: "early".to_string(),
        });
        assert_eq!(session.state(), ConnectionState::Connecting);

        let (connected, status, deferred) = shared.finish_connect().unwrap();
        assert_eq!(connected.state, ConnectionState::Connected);
        assert_eq!(status.state, ConnectionState::Interrupted);
        assert_eq!(deferred.as_deref(), Some("early"));
        assert!(status.last_disconnect.is_some());
    }

    #[test]
    fn test_resume_during_connecting_cancels_deferred_interrupt() {
        let session = ConnectionSession::new(config(), Arc::new(SimulatedTransportBuilder));
        let shared = &session.shared;
        shared.transition(SessionEvent::ConnectAttempt).unwrap();

        shared.apply_transport_event(TransportEvent::Interrupted {
            reason: "blip".to_string(),
        });
        shared.apply_transport_event(TransportEvent::Resumed {
            session_present: true,
        });

        let (_, status, deferred) = shared.finish_connect().unwrap();
        assert_eq!(status.state, ConnectionState::Connected);
        assert!(deferred.is_none());
    }

    #[tokio::test]
    async fn test_out_of_order_notifications_are_ignored() {
        let session = ConnectionSession::new(config(), Arc::new(SimulatedTransportBuilder));

        session.apply_transport_event(TransportEvent::Resumed {
            session_present: false,
        });
        assert_eq!(session.state(), ConnectionState::Disconnected);

        session.apply_transport_event(TransportEvent::Interrupted {
            reason: "x".to_string(),
        });
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connection_probe_preserves_state() {
        let builder = MockTransportBuilder::new();
        let mock = builder.transport();
        let session = ConnectionSession::new(config(), Arc::new(builder));

        // Disconnected: connect, report, disconnect
        assert!(session.test_connection().await);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(mock.connect_calls(), 1);

        // Connected: report without reconnecting or dropping the session
        session.connect().await.unwrap();
        assert!(session.test_connection().await);
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(mock.connect_calls(), 2);

        // Interrupted: report false, leave recovery to the transport
        session.apply_transport_event(TransportEvent::Interrupted {
            reason: "x".to_string(),
        });
        assert!(!session.test_connection().await);
        assert_eq!(session.state(), ConnectionState::Interrupted);
        assert_eq!(mock.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_probe_reports_false() {
        let builder = MockTransportBuilder::new();
        builder.transport().fail_connect(true);
        let session = ConnectionSession::new(config(), Arc::new(builder));

        assert!(!session.test_connection().await);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}

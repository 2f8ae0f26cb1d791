//! Impure I/O for the MQTT transport
//!
//! Each `connect` creates a fresh rumqttc client and event loop and spawns a
//! task that polls it. The task owns reconnection: after an established link
//! drops it reports an interruption, backs off, and polls again, reporting a
//! resumption on the next ConnAck. A first connect that never reaches ConnAck
//! stops the task and fails the call.

use super::connection::{
    configure_mqtt_options, parse_endpoint, LastWillSpec, LinkState, ReconnectConfig,
};
use super::health_monitor::{HealthMonitor, LinkEvent};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::ConnectionConfig;
use crate::protocol::{last_will_payload, TopicBuilder};
use crate::transport::{
    missing_credential_files, ConnectAck, PublishAck, Qos, Transport, TransportBuilder,
    TransportError, TransportEventSender,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop, MqttOptions};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

fn to_mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// One live client plus the task polling its event loop
struct Link {
    client: AsyncClient,
    state_rx: watch::Receiver<LinkState>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// MQTT transport over rumqttc
pub struct MqttTransport {
    client_id: String,
    options: MqttOptions,
    reconnect: ReconnectConfig,
    connect_timeout: Duration,
    publish_timeout: Duration,
    close_timeout: Duration,
    events: TransportEventSender,
    link: Mutex<Option<Link>>,
}

impl MqttTransport {
    pub fn new(
        config: &ConnectionConfig,
        last_will: Option<&LastWillSpec>,
        events: TransportEventSender,
    ) -> Result<Self, TransportError> {
        let options = configure_mqtt_options(config, last_will)?;

        Ok(Self {
            client_id: config.client_id.clone(),
            options,
            reconnect: ReconnectConfig::from_connection(config),
            connect_timeout: config.connect_timeout,
            publish_timeout: config.publish_timeout,
            close_timeout: config.ping_timeout,
            events,
            link: Mutex::new(None),
        })
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_link(&self) -> Option<Link> {
        self.lock_link().take()
    }

    fn current_state(&self) -> Option<LinkState> {
        self.lock_link()
            .as_ref()
            .map(|link| link.state_rx.borrow().clone())
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<LinkState>,
        timeout: Duration,
    ) -> Result<ConnectAck, TransportError> {
        let confirmation = tokio::time::timeout(timeout, async {
            loop {
                match &*state_rx.borrow_and_update() {
                    LinkState::Up { session_present } => {
                        return Ok(ConnectAck {
                            session_present: *session_present,
                        })
                    }
                    LinkState::Failed(reason) => {
                        return Err(TransportError::ConnectFailed(reason.clone()))
                    }
                    LinkState::Closed => {
                        return Err(TransportError::ConnectFailed(
                            "connection closed before ConnAck".to_string(),
                        ))
                    }
                    _ => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(TransportError::ConnectFailed(
                        "event loop stopped before ConnAck".to_string(),
                    ));
                }
            }
        })
        .await;

        confirmation.unwrap_or(Err(TransportError::ConnectTimeout(timeout)))
    }

    /// Stop a link: send DISCONNECT if it is up, then stop the task
    async fn close_link(link: Link, close_timeout: Duration) -> Result<(), TransportError> {
        let Link {
            client,
            state_rx,
            shutdown_tx,
            mut handle,
        } = link;

        let was_up = state_rx.borrow().is_up();
        let mut result = Ok(());

        if was_up {
            match client.disconnect().await {
                Ok(()) => {
                    // Let the event loop flush DISCONNECT before it is told to stop
                    if tokio::time::timeout(close_timeout, &mut handle).await.is_ok() {
                        info!("MQTT event loop stopped after DISCONNECT");
                        return Ok(());
                    }
                }
                Err(e) => result = Err(TransportError::DisconnectFailed(e.to_string())),
            }
        }

        let _ = shutdown_tx.send(true);
        match tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => debug!("MQTT event loop task shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("MQTT event loop task ended with error: {e}"),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("MQTT event loop task didn't shut down gracefully, aborting");
                handle.abort();
            }
        }

        result
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
        if *shutdown_rx.borrow() {
            return false;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Apply one link event: publish the new state and notify the session on
    /// interrupt/resume edges
    fn apply_link_event(
        state_tx: &watch::Sender<LinkState>,
        events: &TransportEventSender,
        event: LinkEvent,
    ) -> LinkState {
        let current = state_tx.borrow().clone();
        let next = HealthMonitor::determine_next_state(&current, event);

        if next != current {
            HealthMonitor::log_state_transition(&current, &next);
        }
        if let Some(notification) = HealthMonitor::notification_for(&current, &next) {
            if events.send(notification).is_err() {
                debug!("session listener gone, dropping link notification");
            }
        }

        let _ = state_tx.send(next.clone());
        next
    }

    async fn run_event_loop(
        client_id: String,
        mut event_loop: EventLoop,
        state_tx: watch::Sender<LinkState>,
        events: TransportEventSender,
        reconnect: ReconnectConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(client_id = %client_id, "Starting MQTT event loop");
        let mut attempt = 0u32;

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT event loop");
                        break;
                    }
                }

                polled = event_loop.poll() => {
                    let link_event = match polled {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            match &route {
                                EventRoute::PublishAcknowledged { packet_id } => {
                                    debug!(target: "mqtt_transport", packet_id, "PubAck received");
                                }
                                EventRoute::InfrastructureEvent(description) => {
                                    debug!(target: "mqtt_transport", "MQTT event: {}", description);
                                }
                                _ => {}
                            }
                            route.link_event()
                        }
                        Err(e) => Some(LinkEvent::NetworkError(e.to_string())),
                    };

                    let Some(link_event) = link_event else {
                        continue;
                    };

                    let state = Self::apply_link_event(&state_tx, &events, link_event);
                    match state {
                        LinkState::Up { .. } => attempt = 0,
                        LinkState::Failed(_) | LinkState::Closed => break,
                        ref s if HealthMonitor::should_reconnect(s, *shutdown_rx.borrow()) => {
                            attempt = attempt.saturating_add(1);
                            Self::apply_link_event(
                                &state_tx,
                                &events,
                                LinkEvent::ReconnectionStarted(attempt),
                            );
                            let delay = HealthMonitor::reconnect_delay(&reconnect, attempt);
                            info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting to broker");
                            if !Self::interruptible_sleep(shutdown_rx.clone(), delay).await {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        info!(client_id = %client_id, "MQTT event loop stopped");
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<ConnectAck, TransportError> {
        if let Some(LinkState::Up { session_present }) = self.current_state() {
            return Ok(ConnectAck { session_present });
        }

        // A stale link (failed, closed, or still recovering) is replaced
        if let Some(stale) = self.take_link() {
            let _ = Self::close_link(stale, self.close_timeout).await;
        }

        let (client, event_loop) = AsyncClient::new(self.options.clone(), REQUEST_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(LinkState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(Self::run_event_loop(
            self.client_id.clone(),
            event_loop,
            state_tx,
            self.events.clone(),
            self.reconnect,
            shutdown_rx,
        ));

        *self.lock_link() = Some(Link {
            client,
            state_rx: state_rx.clone(),
            shutdown_tx,
            handle,
        });

        match Self::wait_for_connection_confirmation(state_rx, self.connect_timeout).await {
            Ok(ack) => Ok(ack),
            Err(e) => {
                if let Some(link) = self.take_link() {
                    let _ = Self::close_link(link, self.close_timeout).await;
                }
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        match self.take_link() {
            Some(link) => Self::close_link(link, self.close_timeout).await,
            None => Ok(()),
        }
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: Qos,
        retain: bool,
    ) -> Result<PublishAck, TransportError> {
        let client = {
            let guard = self.lock_link();
            match guard.as_ref() {
                Some(link) if HealthMonitor::can_publish(&link.state_rx.borrow()) => {
                    link.client.clone()
                }
                _ => return Err(TransportError::NotConnected),
            }
        };

        let message_id = Uuid::new_v4().to_string();
        let send = client.publish(topic, to_mqtt_qos(qos), retain, payload);
        match tokio::time::timeout(self.publish_timeout, send).await {
            Ok(Ok(())) => {
                debug!(topic, %message_id, "MQTT publish queued");
                Ok(PublishAck {
                    message_id: Some(message_id),
                })
            }
            Ok(Err(e)) => Err(TransportError::PublishFailed(e.to_string())),
            Err(_) => Err(TransportError::PublishTimeout(self.publish_timeout)),
        }
    }

    fn kind(&self) -> &'static str {
        "mqtt"
    }
}

/// Builds [`MqttTransport`]s with a retained `offline` last will on the
/// device's status topic
#[derive(Debug, Clone)]
pub struct MqttTransportBuilder {
    topics: TopicBuilder,
}

impl MqttTransportBuilder {
    pub fn new(topics: TopicBuilder) -> Self {
        Self { topics }
    }
}

impl TransportBuilder for MqttTransportBuilder {
    /// Plain `mqtt://` endpoints need no certificates
    fn missing_credentials(&self, config: &ConnectionConfig) -> Vec<String> {
        match parse_endpoint(&config.endpoint, config.port) {
            Ok(address) if address.tls => missing_credential_files(config),
            _ => Vec::new(),
        }
    }

    fn build(
        &self,
        config: &ConnectionConfig,
        events: TransportEventSender,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let will = LastWillSpec {
            topic: self.topics.status(),
            payload: last_will_payload(self.topics.device_id())?,
        };
        let transport = MqttTransport::new(config, Some(&will), events)?;
        Ok(Arc::new(transport))
    }

    fn kind(&self) -> &'static str {
        "mqtt"
    }
}

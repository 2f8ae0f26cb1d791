//! Pure link-health state transitions for the MQTT event loop
//!
//! The event-loop task feeds every relevant rumqttc event through
//! [`HealthMonitor::determine_next_state`] and reports the resulting edge, if
//! any, to the session as a [`TransportEvent`].

use super::connection::{LinkState, ReconnectConfig};
use crate::transport::TransportEvent;
use std::time::Duration;
use tracing::{error, info, warn};

/// Input to the link state machine
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    ConnAckReceived { session_present: bool },
    DisconnectedByBroker,
    NetworkError(String),
    ReconnectionStarted(u32),
    /// The client sent DISCONNECT
    ClientDisconnect,
}

/// Pure link-health decisions
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine next state after a link event (pure function)
    pub fn determine_next_state(current: &LinkState, event: LinkEvent) -> LinkState {
        match (current, event) {
            (LinkState::Closed, _) | (_, LinkEvent::ClientDisconnect) => LinkState::Closed,
            (LinkState::Failed(reason), _) => LinkState::Failed(reason.clone()),

            (_, LinkEvent::ConnAckReceived { session_present }) => {
                LinkState::Up { session_present }
            }

            // No ConnAck yet: the initial connect failed and is not retried
            (LinkState::Connecting, LinkEvent::NetworkError(reason)) => LinkState::Failed(reason),
            (LinkState::Connecting, LinkEvent::DisconnectedByBroker) => {
                LinkState::Failed("broker closed the connection before ConnAck".to_string())
            }

            (_, LinkEvent::NetworkError(reason)) => LinkState::Down(reason),
            (_, LinkEvent::DisconnectedByBroker) => {
                LinkState::Down("broker disconnected".to_string())
            }

            (LinkState::Down(_) | LinkState::Reconnecting(_), LinkEvent::ReconnectionStarted(n)) => {
                LinkState::Reconnecting(n)
            }
            (state, LinkEvent::ReconnectionStarted(_)) => state.clone(),
        }
    }

    /// Session notification for a state edge, if the edge is one the session
    /// must hear about
    pub fn notification_for(previous: &LinkState, next: &LinkState) -> Option<TransportEvent> {
        match (previous, next) {
            (LinkState::Up { .. }, LinkState::Down(reason)) => Some(TransportEvent::Interrupted {
                reason: reason.clone(),
            }),
            (prev, LinkState::Up { session_present }) if prev.is_recovering() => {
                Some(TransportEvent::Resumed {
                    session_present: *session_present,
                })
            }
            _ => None,
        }
    }

    /// Whether the event loop should back off and poll again
    pub fn should_reconnect(state: &LinkState, shutdown_requested: bool) -> bool {
        !shutdown_requested && state.is_recovering()
    }

    pub fn reconnect_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
        config.calculate_backoff_delay(attempt)
    }

    /// Check if link state allows publishing (pure function)
    pub fn can_publish(state: &LinkState) -> bool {
        state.is_up()
    }

    /// Log link state transition (pure logging function)
    pub fn log_state_transition(from: &LinkState, to: &LinkState) {
        match (from, to) {
            (LinkState::Connecting, LinkState::Up { session_present }) => {
                info!(session_present, "MQTT connection established");
            }
            (LinkState::Up { .. }, LinkState::Down(reason)) => {
                warn!(%reason, "MQTT connection interrupted");
            }
            (_, LinkState::Reconnecting(attempt)) => {
                info!(attempt, "MQTT reconnection attempt scheduled");
            }
            (prev, LinkState::Up { session_present }) if prev.is_recovering() => {
                info!(session_present, "MQTT connection resumed");
            }
            (_, LinkState::Failed(reason)) => {
                error!(%reason, "MQTT connection failed");
            }
            (_, LinkState::Closed) => {
                info!("MQTT connection closed");
            }
            _ => {}
        }
    }
}

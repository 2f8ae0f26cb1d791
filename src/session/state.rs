//! Pure session state transitions

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Lifecycle of the logical broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The link dropped after a successful connect; the transport is reconnecting
    Interrupted,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only inputs that may change [`ConnectionState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectAttempt,
    ConnectSucceeded,
    /// Return to the state held before the attempt
    ConnectFailed { restore: ConnectionState },
    Disconnected,
    Interrupted,
    Resumed,
}

/// Next state for `event`, or `None` when the event is out of order for
/// `current` and must be ignored
pub fn next_state(current: ConnectionState, event: SessionEvent) -> Option<ConnectionState> {
    use ConnectionState::*;

    match (current, event) {
        (Disconnected | Interrupted, SessionEvent::ConnectAttempt) => Some(Connecting),
        (Connecting, SessionEvent::ConnectSucceeded) => Some(Connected),
        (Connecting, SessionEvent::ConnectFailed { restore }) => match restore {
            Interrupted => Some(Interrupted),
            _ => Some(Disconnected),
        },
        (_, SessionEvent::Disconnected) => Some(Disconnected),
        (Connected, SessionEvent::Interrupted) => Some(Interrupted),
        (Interrupted, SessionEvent::Resumed) => Some(Connected),
        _ => None,
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Successful connects over the session's lifetime
    pub attempt_count: u32,
    pub last_connect: Option<DateTime<Utc>>,
    pub last_disconnect: Option<DateTime<Utc>>,
    pub endpoint: String,
    pub client_id: String,
    pub transport: &'static str,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    const ALL_STATES: [ConnectionState; 4] = [Disconnected, Connecting, Connected, Interrupted];

    #[test]
    fn test_connect_cycle() {
        let connecting = next_state(Disconnected, SessionEvent::ConnectAttempt).unwrap();
        assert_eq!(connecting, Connecting);
        assert_eq!(
            next_state(connecting, SessionEvent::ConnectSucceeded),
            Some(Connected)
        );
    }

    #[test]
    fn test_failed_connect_restores_previous_state() {
        assert_eq!(
            next_state(
                Connecting,
                SessionEvent::ConnectFailed {
                    restore: Interrupted
                }
            ),
            Some(Interrupted)
        );
        assert_eq!(
            next_state(
                Connecting,
                SessionEvent::ConnectFailed {
                    restore: Disconnected
                }
            ),
            Some(Disconnected)
        );
    }

    #[test]
    fn test_interrupt_and_resume_only_from_matching_state() {
        assert_eq!(next_state(Connected, SessionEvent::Interrupted), Some(Interrupted));
        assert_eq!(next_state(Interrupted, SessionEvent::Resumed), Some(Connected));

        for state in [Disconnected, Connecting, Interrupted] {
            assert_eq!(next_state(state, SessionEvent::Interrupted), None);
        }
        for state in [Disconnected, Connecting, Connected] {
            assert_eq!(next_state(state, SessionEvent::Resumed), None);
        }
    }

    #[test]
    fn test_disconnect_from_any_state() {
        for state in ALL_STATES {
            assert_eq!(next_state(state, SessionEvent::Disconnected), Some(Disconnected));
        }
    }

    #[test]
    fn test_no_connect_attempt_while_connected_or_connecting() {
        assert_eq!(next_state(Connected, SessionEvent::ConnectAttempt), None);
        assert_eq!(next_state(Connecting, SessionEvent::ConnectAttempt), None);
    }
}

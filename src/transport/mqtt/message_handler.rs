//! Pure routing of rumqttc events
//!
//! The monitor only publishes, so the interesting incoming packets are the
//! connection lifecycle ones. Everything else is logged at debug level.

use super::health_monitor::LinkEvent;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Routing decision for one event-loop event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    ConnectionAcknowledged { session_present: bool },
    Disconnected,
    /// Our own DISCONNECT went out
    DisconnectSent,
    PublishAcknowledged { packet_id: u16 },
    InfrastructureEvent(String),
    OutgoingEvent,
}

impl EventRoute {
    /// Link state input for this route, if it affects link health
    pub fn link_event(&self) -> Option<LinkEvent> {
        match self {
            EventRoute::ConnectionAcknowledged { session_present } => {
                Some(LinkEvent::ConnAckReceived {
                    session_present: *session_present,
                })
            }
            EventRoute::Disconnected => Some(LinkEvent::DisconnectedByBroker),
            EventRoute::DisconnectSent => Some(LinkEvent::ClientDisconnect),
            _ => None,
        }
    }
}

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(ack) => EventRoute::ConnectionAcknowledged {
                    session_present: ack.session_present,
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::PubAck(ack) => EventRoute::PublishAcknowledged {
                    packet_id: ack.pkid,
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

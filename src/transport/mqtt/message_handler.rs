//! Pure routing of rumqttc events

use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;

/// What the poll loop should do with one event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    ConnectionAcknowledged,
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    Disconnected,
    SubscriptionConfirmed,
    Ignored,
}

pub struct MessageHandler;

impl MessageHandler {
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => EventRoute::ConnectionAcknowledged,
            Event::Incoming(Packet::Publish(publish)) => EventRoute::MessageReceived {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload.to_vec(),
                retain: publish.retain,
            },
            Event::Incoming(Packet::Disconnect(_)) => EventRoute::Disconnected,
            Event::Incoming(Packet::SubAck(_)) => EventRoute::SubscriptionConfirmed,
            _ => EventRoute::Ignored,
        }
    }

    /// Retained messages are stale replays of an earlier publish
    pub fn should_forward(retain: bool, channel: Option<&str>) -> bool {
        !retain && channel.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Publish,
    };
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_route_connack() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_route_publish() {
        let event = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("signals/events/pipeline.results"),
            pkid: 1,
            payload: Bytes::from("{}"),
            properties: None,
        }));

        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                assert_eq!(topic, "signals/events/pipeline.results");
                assert_eq!(payload, b"{}".to_vec());
                assert!(!retain);
            }
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[test]
    fn test_route_disconnect() {
        let event = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::Disconnected
        );
    }

    #[test]
    fn test_should_forward() {
        assert!(MessageHandler::should_forward(false, Some("pipeline.results")));
        assert!(!MessageHandler::should_forward(true, Some("pipeline.results")));
        assert!(!MessageHandler::should_forward(false, None));
    }
}

//! Pure routing of `rumqttc` events into session events
//!
//! This module contains pure functions that translate MQTT v5 packets into
//! [`SessionEvent`]s and build subscribe requests.

use crate::protocol::{InboundMessage, TopicSubscription};
use crate::transport::SessionEvent;
use rumqttc::v5::mqttbytes::v5::{Filter, Packet, SubscribeReasonCode};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::Event;

/// Reason code reported for any refused topic filter
pub const SUBSCRIBE_FAILURE_CODE: u8 = 0x80;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to the session event it represents
    pub fn route_mqtt_event(event: Event) -> SessionEvent {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => SessionEvent::ConnectionAcknowledged,
                Packet::Publish(publish) => SessionEvent::MessageReceived(InboundMessage {
                    topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                    payload: publish.payload,
                }),
                Packet::Disconnect(_) => SessionEvent::Disconnected,
                Packet::SubAck(suback) => SessionEvent::SubscriptionConfirmed {
                    return_codes: suback
                        .return_codes
                        .iter()
                        .map(Self::reason_code_to_byte)
                        .collect(),
                },
                other => SessionEvent::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => SessionEvent::OutgoingEvent,
        }
    }

    /// Granted QoS for a successful filter, failure code otherwise
    fn reason_code_to_byte(code: &SubscribeReasonCode) -> u8 {
        match code {
            SubscribeReasonCode::Success(qos) => *qos as u8,
            _ => SUBSCRIBE_FAILURE_CODE,
        }
    }

    /// Map a configured QoS level onto the protocol enum
    pub fn qos_from_level(level: u8) -> QoS {
        match level {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            // Topic parsing caps levels at 2
            _ => QoS::ExactlyOnce,
        }
    }

    /// Build one filter per subscribed topic (pure function)
    pub fn build_subscription_filters(subscriptions: &TopicSubscription) -> Vec<Filter> {
        subscriptions
            .iter()
            .map(|(topic, qos)| Filter::new(topic, Self::qos_from_level(qos)))
            .collect()
    }

    /// Validate subscription success from SubAck (pure function)
    pub fn validate_subscription_success(return_codes: &[u8]) -> Result<(), Vec<u8>> {
        if return_codes.iter().any(|&code| code >= SUBSCRIBE_FAILURE_CODE) {
            Err(return_codes.to_vec())
        } else {
            Ok(())
        }
    }
}

//! Impure I/O operations for the MQTT session
//!
//! Wraps a `rumqttc` v5 client and its event loop behind [`BrokerSession`].
//! The event loop reconnects by itself on the next poll after an error, so
//! retry pacing is left entirely to the connection manager.

use super::connection::{configure_mqtt_options, MqttError};
use super::message_handler::MessageHandler;
use crate::config::MqttSection;
use crate::protocol::TopicSubscription;
use crate::transport::{BrokerSession, SessionEvent};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use tracing::{debug, info};

/// Capacity of the request queue between client handle and event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// MQTT session backed by `rumqttc`
pub struct MqttSession {
    client: AsyncClient,
    event_loop: EventLoop,
}

impl MqttSession {
    /// Build the session; no network I/O happens until the first poll
    pub fn new(config: &MqttSection) -> Result<Self, MqttError> {
        let mqtt_options = configure_mqtt_options(config)?;
        info!("BROKER url: {}", config.broker_url);
        if let Some((username, _)) = config.credentials() {
            info!("BROKER username: {}", username);
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        Ok(Self { client, event_loop })
    }
}

#[async_trait]
impl BrokerSession for MqttSession {
    type Error = MqttError;

    async fn poll(&mut self) -> Result<SessionEvent, Self::Error> {
        let event = self
            .event_loop
            .poll()
            .await
            .map_err(|e| MqttError::ConnectionFailed(Box::new(e)))?;
        Ok(MessageHandler::route_mqtt_event(event))
    }

    async fn subscribe(&mut self, subscriptions: &TopicSubscription) -> Result<(), Self::Error> {
        let filters = MessageHandler::build_subscription_filters(subscriptions);
        debug!(target: "mqtt_transport", "Subscribing to {} topic filters", filters.len());

        self.client
            .subscribe_many(filters)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.client
            .disconnect()
            .await
            .map_err(|e| MqttError::DisconnectFailed(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation_does_not_connect() {
        let config = MqttSection::new("mqtt://localhost:9", vec!["a?0".to_string()]);
        assert!(MqttSession::new(&config).is_ok());
    }

    #[test]
    fn test_session_rejects_invalid_url() {
        let config = MqttSection::new("not a url", vec![]);
        assert!(matches!(
            MqttSession::new(&config),
            Err(MqttError::InvalidBrokerUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_poll_against_closed_port_fails() {
        // Port 9 (discard) is almost never served; the attempt must fail, not hang
        let config = MqttSection::new("mqtt://127.0.0.1:9", vec![]);
        let mut session = MqttSession::new(&config).unwrap();

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(5), session.poll()).await;
        assert!(matches!(result, Ok(Err(MqttError::ConnectionFailed(_)))));
    }
}

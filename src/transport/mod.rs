//! Broker transport layer
//!
//! [`BrokerSession`] is the seam between the connection manager and a concrete
//! broker client. The `rumqttc` implementation lives in [`mqtt`]; tests drive
//! the same manager with a scripted session.

use crate::protocol::{InboundMessage, TopicSubscription};

pub mod manager;
pub mod mqtt;

pub use manager::ConnectionManager;

/// Events surfaced by polling a broker session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Broker acknowledged the connection
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived(InboundMessage),
    /// Broker closed the session
    Disconnected,
    /// Broker answered a subscribe request; codes >= 0x80 are failures
    SubscriptionConfirmed { return_codes: Vec<u8> },
    /// Anything else coming from the broker (PingResp, PubAck, ...)
    InfrastructureEvent(String),
    /// Packet written by the client
    OutgoingEvent,
}

/// A connection to a publish/subscribe broker
///
/// Polling drives all network I/O: a failed poll means the connection attempt
/// failed or an established connection was lost, and the next poll starts a
/// fresh attempt.
#[async_trait::async_trait]
pub trait BrokerSession: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Wait for the next event from the broker
    async fn poll(&mut self) -> Result<SessionEvent, Self::Error>;

    /// Request a subscription to every topic in one call
    async fn subscribe(&mut self, subscriptions: &TopicSubscription) -> Result<(), Self::Error>;

    /// Request a graceful disconnect
    async fn disconnect(&mut self) -> Result<(), Self::Error>;
}

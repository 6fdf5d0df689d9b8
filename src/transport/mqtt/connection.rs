//! Pure connection state management for the MQTT session
//!
//! This module contains the connection state machine types, the reconnection
//! policy and the translation of configuration into `rumqttc` options.

use crate::config::MqttSection;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Largest packet accepted from or sent to the broker
pub const MAX_PACKET_SIZE: u32 = 1024 * 1024;

/// Connection state of the broker session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No connection and no attempt in progress
    Disconnected(String),
    /// Connection attempt in progress
    Connecting,
    /// Broker acknowledged the connection
    Connected,
    /// Waiting out the backoff before reconnection attempt n
    Reconnecting(u32),
    /// Reconnection cap exceeded
    PermanentlyDisconnected(String),
}

/// Reconnection policy: a fixed delay between attempts, unbounded by default
///
/// The delay never grows; every failed attempt waits the same interval.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before each reconnection attempt
    pub delay: Duration,
    /// Maximum number of consecutive failed attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &MqttSection) -> Self {
        Self {
            delay: config.reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Fixed policy with the given delay and no cap
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay before the given attempt
    pub fn backoff_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }

    /// Total time spent backing off before giving up, None when unbounded
    pub fn max_total_backoff(&self) -> Option<Duration> {
        self.max_attempts
            .map(|max_attempts| self.delay.saturating_mul(max_attempts))
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription rejected by broker with reason codes {0:?}")]
    SubscriptionRejected(Vec<u8>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Max reconnection attempts ({0}) exceeded")]
    ReconnectExhausted(u32),
}

/// Host, port and TLS flag extracted from a broker URL
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse a broker URL. `mqtt`/`tcp` are plain, `mqtts`/`ssl`/`tls` use TLS.
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerAddress, MqttError> {
    let url =
        Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" | "tls" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerAddress {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Client identifier: configured value, or one generated when the session is built
pub fn client_id(config: &MqttSection) -> String {
    match &config.client_id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => format!("mqttbeat-{}", chrono::Utc::now().timestamp_millis()),
    }
}

/// Pure function to configure MQTT options from config
pub fn configure_mqtt_options(config: &MqttSection) -> Result<MqttOptions, MqttError> {
    let address = parse_broker_url(&config.broker_url)?;
    let mut mqtt_options = MqttOptions::new(client_id(config), address.host, address.port);

    if address.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    // Credentials only when both halves are configured
    if let Some((username, password)) = config.credentials() {
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    Ok(mqtt_options)
}

//! MQTT session implementation
//!
//! This module separates pure functions from I/O operations:
//!
//! - [`connection`] - Connection state, reconnection policy and client options
//! - [`message_handler`] - Pure translation of MQTT packets into session events
//! - [`health_monitor`] - Pure state-transition and reconnection decisions
//! - [`client`] - The `rumqttc` backed [`MqttSession`]
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqttbeat::config::MqttSection;
//! use mqttbeat::transport::mqtt::{MqttSession, ReconnectPolicy};
//! use mqttbeat::transport::ConnectionManager;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection::new("mqtt://localhost:1883", vec!["sensors/#?1".to_string()]);
//! let session = MqttSession::new(&config)?;
//! let (tx, _rx) = tokio::sync::mpsc::channel(100);
//!
//! let mut manager = ConnectionManager::new(
//!     session,
//!     config.subscriptions()?,
//!     ReconnectPolicy::from_config(&config),
//!     tx,
//! );
//! manager.connect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

// Re-export public types for convenience
pub use client::MqttSession;
pub use connection::{
    configure_mqtt_options, parse_broker_url, BrokerAddress, ConnectionState, MqttError,
    ReconnectPolicy,
};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::MessageHandler;

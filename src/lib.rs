//! mqttbeat - MQTT to structured event pipeline
//!
//! Subscribes to a set of MQTT topics, wraps every received message into an
//! event (decoding JSON object payloads when possible) and hands the events
//! to a sink, one at a time and in arrival order.
//!
//! # Overview
//!
//! - [`protocol`] - `topic?qos` parsing and the event model
//! - [`ingest`] - payload decoding and the single event consumer
//! - [`transport`] - broker session, connection manager and reconnect policy
//! - [`publisher`] - sink contract and the JSON-lines sink
//! - [`lifecycle`] - start, run and stop the whole pipeline
//!
//! # Quick Start
//!
//! ```rust
//! use mqttbeat::ingest::decode_payload;
//! use mqttbeat::protocol::{Event, TopicSubscription};
//!
//! let topics = TopicSubscription::parse(&["sensors/+/temp?1", "alerts?2"]).unwrap();
//! assert_eq!(topics.qos("alerts"), Some(2));
//!
//! let (fields, decoded) = decode_payload("sensors/1/temp", br#"{"celsius":21.5}"#);
//! assert!(decoded);
//!
//! let event = Event::captured_now(fields);
//! let line = serde_json::to_string(&event).unwrap();
//! assert!(line.contains(r#""decoded":true"#));
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod lifecycle;
pub mod observability;
pub mod protocol;
pub mod publisher;
pub mod testing;
pub mod transport;

pub use config::*;
pub use error::{BeatError, BeatResult};
pub use lifecycle::{Beater, StopHandle};
pub use protocol::*;
pub use transport::mqtt::MqttSession;

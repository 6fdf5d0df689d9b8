//! Message and event types flowing through the ingestion pipeline
//!
//! An [`InboundMessage`] is what the broker hands us; an [`Event`] is what we
//! hand to the sink. Events come in two shapes, decoded and undecoded, which
//! differ only in the `decoded` flag and the presence of `msg`.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Index name stamped on every event
pub const BEAT_INDEX: &str = "mqttbeat";

/// Document type stamped on every event
pub const BEAT_TYPE: &str = "message";

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text, replacing invalid UTF-8 sequences
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Beat metadata attached to every event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BeatMeta {
    pub index: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Default for BeatMeta {
    fn default() -> Self {
        Self {
            index: BEAT_INDEX.to_string(),
            kind: BEAT_TYPE.to_string(),
        }
    }
}

/// Field set of an event
///
/// `msg` is only present for decoded payloads and is omitted from the
/// serialized form otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventFields {
    pub beat: BeatMeta,
    pub topic: String,
    pub decoded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<Map<String, Value>>,
    pub msg_raw: String,
}

impl EventFields {
    /// Fields for a payload that parsed as a JSON object
    pub fn decoded(topic: &str, msg: Map<String, Value>, raw: String) -> Self {
        Self {
            beat: BeatMeta::default(),
            topic: topic.to_string(),
            decoded: true,
            msg: Some(msg),
            msg_raw: raw,
        }
    }

    /// Fields for a payload passed through as raw text
    pub fn undecoded(topic: &str, raw: String) -> Self {
        Self {
            beat: BeatMeta::default(),
            topic: topic.to_string(),
            decoded: false,
            msg: None,
            msg_raw: raw,
        }
    }
}

/// Event handed to the sink
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Capture time, not broker time
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: EventFields,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, fields: EventFields) -> Self {
        Self { timestamp, fields }
    }

    /// Event stamped with the current time
    pub fn captured_now(fields: EventFields) -> Self {
        Self::new(Utc::now(), fields)
    }
}

//! Payload decoding
//!
//! Payloads are tried as JSON objects. Anything else (malformed JSON, arrays,
//! scalars, invalid UTF-8) is passed through as raw text. Decoding never fails.

use crate::protocol::EventFields;
use serde_json::{Map, Value};
use tracing::debug;

/// Decode `payload` received on `topic` into event fields.
///
/// Returns the fields together with whether structured decoding succeeded.
pub fn decode_payload(topic: &str, payload: &[u8]) -> (EventFields, bool) {
    let raw = String::from_utf8_lossy(payload).into_owned();

    match serde_json::from_slice::<Map<String, Value>>(payload) {
        Ok(msg) => {
            debug!(target: "mqttbeat::decoder", topic = %topic, "Payload decoded");
            (EventFields::decoded(topic, msg, raw), true)
        }
        Err(e) => {
            debug!(
                target: "mqttbeat::decoder",
                topic = %topic,
                error = %e,
                "Payload is not a JSON object, passing through raw"
            );
            (EventFields::undecoded(topic, raw), false)
        }
    }
}

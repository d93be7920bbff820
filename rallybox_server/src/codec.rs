//! Envelope codec for messages carried on the data channel.
//!
//! Envelopes are JSON objects keyed by event name:
//!
//! - `{"<event>": "<string payload>"}` or `{"<event>": {<object payload>}}`
//! - `{"<event>": {"MESSAGE": <payload>, "RELIABLE": 1, "ID": "<id>"}}` for
//!   reliable emissions, acknowledged with `{"RELIABLE_ACK": "<id>"}`
//!
//! Anything that is not a JSON object is surfaced as raw bytes.

use bytes::Bytes;
use serde_json::Value;

pub const RELIABLE: &str = "RELIABLE";
pub const MESSAGE: &str = "MESSAGE";
pub const ID: &str = "ID";
pub const RELIABLE_ACK: &str = "RELIABLE_ACK";

/// Separator used to join message parts
const PART_SEPARATOR: &str = ", ";

/// A decoded inbound item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Application event with its payload as text
    Event {
        event: String,
        payload: String,
        reliable: Option<ReliableTag>,
    },
    /// Acknowledgement of one of our reliable emissions
    Ack(String),
    /// Payload that is not a JSON envelope
    Raw(Bytes),
}

/// Marker carried by reliable envelopes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReliableTag {
    pub id: Option<String>,
}

/// JSON text for the data part of an envelope.
///
/// Parts are joined with `", "`. A result that is a JSON object is embedded
/// as is; anything else becomes a JSON string literal.
pub fn encode_data(parts: &[&str]) -> String {
    let data = parts.join(PART_SEPARATOR);
    if looks_like_object(&data) && serde_json::from_str::<Value>(&data).is_ok() {
        data
    } else {
        quote(&data)
    }
}

/// `{"<event>": <data>}`
pub fn encode(event: &str, parts: &[&str]) -> String {
    format!("{{{}:{}}}", quote(event), encode_data(parts))
}

/// `{"<event>": {"MESSAGE": <data>, "RELIABLE": 1, "ID": "<id>"}}`
pub fn encode_reliable(event: &str, parts: &[&str], id: &str) -> String {
    format!(
        "{{{}:{{{}:{},{}:1,{}:{}}}}}",
        quote(event),
        quote(MESSAGE),
        encode_data(parts),
        quote(RELIABLE),
        quote(ID),
        quote(id)
    )
}

/// `{"RELIABLE_ACK": "<id>"}`
pub fn encode_ack(id: &str) -> String {
    format!("{{{}:{}}}", quote(RELIABLE_ACK), quote(id))
}

/// Split one inbound message into the items it carries
pub fn decode(data: &[u8]) -> Vec<Inbound> {
    let map = match serde_json::from_slice::<Value>(data) {
        Ok(Value::Object(map)) => map,
        _ => return vec![Inbound::Raw(Bytes::copy_from_slice(data))],
    };

    map.into_iter()
        .map(|(event, value)| match value {
            Value::String(id) if event == RELIABLE_ACK => Inbound::Ack(id),
            Value::Object(mut inner) if is_reliable(&inner) => {
                let message = inner.remove(MESSAGE).unwrap_or(Value::Null);
                let id = match inner.remove(ID) {
                    Some(Value::String(id)) => Some(id),
                    Some(Value::Number(n)) => Some(n.to_string()),
                    _ => None,
                };
                Inbound::Event {
                    event,
                    payload: payload_text(message),
                    reliable: Some(ReliableTag { id }),
                }
            }
            other => Inbound::Event {
                event,
                payload: payload_text(other),
                reliable: None,
            },
        })
        .collect()
}

fn is_reliable(inner: &serde_json::Map<String, Value>) -> bool {
    matches!(inner.get(RELIABLE), Some(Value::Number(_))) && inner.contains_key(MESSAGE)
}

fn payload_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

fn looks_like_object(data: &str) -> bool {
    data.starts_with('{') && data.ends_with('}')
}

fn quote(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

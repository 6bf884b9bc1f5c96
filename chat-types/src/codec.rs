//! Wire codec for chat messages.
//!
//! A payload is a JSON object with exactly three fields:
//!
//! ```text
//! {"sender": "alice", "text": "hi", "timestamp": 1000}
//! ```
//!
//! The store-assigned id is local and never encoded. Decoding is strict: any
//! deviation from this shape is a [`DecodeError`], never a partially filled
//! message.

use serde::{de, Deserialize, Serialize};

use crate::{CodecError, DecodeError, Message, NewMessage};

/// Maximum accepted payload size (64 KiB).
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

#[derive(Serialize)]
struct WireRef<'a> {
    sender: &'a str,
    text: &'a str,
    timestamp: i64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Wire {
    sender: String,
    text: String,
    timestamp: i64,
}

/// Encode a stored message into a wire payload.
///
/// Deterministic: the same message always yields the same bytes.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    to_bytes(WireRef {
        sender: &message.sender,
        text: &message.text,
        timestamp: message.timestamp,
    })
}

/// Encode a not-yet-stored message into a wire payload.
pub fn encode_draft(message: &NewMessage) -> Result<Vec<u8>, CodecError> {
    to_bytes(WireRef {
        sender: &message.sender,
        text: &message.text,
        timestamp: message.timestamp,
    })
}

fn to_bytes(wire: WireRef<'_>) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(&wire).map_err(CodecError::Serialization)
}

/// Decode a wire payload.
pub fn decode(bytes: &[u8]) -> Result<NewMessage, DecodeError> {
    if bytes.len() > MAX_PAYLOAD_SIZE {
        return Err(DecodeError::TooLarge {
            size: bytes.len(),
            limit: MAX_PAYLOAD_SIZE,
        });
    }

    // Derived structs also accept a positional array; only the object form is valid.
    if bytes.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'[') {
        return Err(DecodeError::Schema(<serde_json::Error as de::Error>::custom(
            "expected a JSON object, found an array",
        )));
    }
    let wire: Wire = serde_json::from_slice(bytes).map_err(DecodeError::from_json)?;

    if wire.text.trim().is_empty() {
        return Err(DecodeError::EmptyText);
    }

    Ok(NewMessage {
        sender: wire.sender,
        text: wire.text,
        timestamp: wire.timestamp,
    })
}

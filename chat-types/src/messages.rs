//! Chat records for linkchat.
//!
//! A [`NewMessage`] is what travels between devices. A [`Message`] is what the
//! local store hands back after assigning it a [`MessageId`].

use serde::{Deserialize, Serialize};

use crate::MessageId;

/// The local user's identity.
///
/// Created once per device and immutable for the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Username shown as the sender of locally composed messages.
    pub username: String,
}

impl Profile {
    /// Create a profile for the given username.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// A message that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Username of the author.
    pub sender: String,
    /// Message body (never empty).
    pub text: String,
    /// Milliseconds since the Unix epoch, as stamped by the author.
    pub timestamp: i64,
}

impl NewMessage {
    /// Create a new unstored message.
    pub fn new(sender: impl Into<String>, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp,
        }
    }

    /// Attach the id assigned by the store.
    pub fn with_id(self, id: MessageId) -> Message {
        Message {
            id,
            sender: self.sender,
            text: self.text,
            timestamp: self.timestamp,
        }
    }
}

/// A stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Store-assigned id (local only, never on the wire).
    pub id: MessageId,
    /// Username of the author.
    pub sender: String,
    /// Message body (never empty).
    pub text: String,
    /// Milliseconds since the Unix epoch, as stamped by the author.
    pub timestamp: i64,
}

impl Message {
    /// Ordering key used for history replay: timestamp, then id.
    pub fn sort_key(&self) -> (i64, MessageId) {
        (self.timestamp, self.id)
    }
}

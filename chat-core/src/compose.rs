//! Acceptance rules for outgoing and incoming messages.

use chat_types::{NewMessage, Profile};

/// Build an outgoing message, or `None` when there is nothing to send.
///
/// Blank text and a missing profile are both no-ops, not errors.
pub fn compose(text: &str, profile: Option<&Profile>, timestamp: i64) -> Option<NewMessage> {
    if text.trim().is_empty() {
        return None;
    }
    let profile = profile?;
    Some(NewMessage::new(profile.username.as_str(), text, timestamp))
}

/// What to do with a decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Store and render it.
    Accept(NewMessage),
    /// Authored under the local username; drop it.
    SelfEcho,
}

/// Decide whether a decoded inbound message is accepted.
///
/// A message whose sender equals the local username is treated as an echo
/// of our own message. This cannot tell a real echo apart from another device
/// that picked the same username; both are dropped.
pub fn classify_inbound(message: NewMessage, local: Option<&Profile>) -> Inbound {
    match local {
        Some(profile) if profile.username == message.sender => Inbound::SelfEcho,
        _ => Inbound::Accept(message),
    }
}

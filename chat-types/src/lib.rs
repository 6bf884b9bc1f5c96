//! # chat-types
//!
//! Data model and wire codec for linkchat.
//!
//! This crate provides the foundational types used across all linkchat crates:
//! - [`DeviceId`], [`MessageId`] - Identity and ordering types
//! - [`Profile`], [`NewMessage`], [`Message`] - The local user and chat records
//! - [`codec`] - Message <-> wire payload conversion
//! - [`CodecError`], [`DecodeError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
mod error;
mod ids;
mod messages;

pub use codec::{decode, encode, encode_draft, MAX_PAYLOAD_SIZE};
pub use error::{CodecError, DecodeError};
pub use ids::{DeviceId, MessageId};
pub use messages::{Message, NewMessage, Profile};

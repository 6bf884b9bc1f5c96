//! Events surfaced to the application layer.

use crate::peer::PeerSummary;
use chat_core::CloseReason;
use chat_types::{DeviceId, Message};

/// Something the UI should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A message was accepted and persisted.
    Message {
        /// The stored message, with its id.
        message: Message,
        /// True when composed locally.
        mine: bool,
    },
    /// A peer link became ready.
    PeerConnected(PeerSummary),
    /// A ready peer link ended.
    PeerDisconnected {
        /// Remote device.
        device_id: DeviceId,
        /// Why the link ended.
        reason: CloseReason,
    },
}

//! Peer link state machine for linkchat.
//!
//! This module provides a pure, side-effect-free state machine for one link to
//! one remote device. The state machine takes events as input and produces a
//! new state plus a list of actions to execute.
//!
//! ```text
//! Connecting ──Subscribed──► Ready
//!     │                        │
//!     └──── lost / teardown ───┴──► Disconnected (terminal)
//! ```
//!
//! A link never leaves `Disconnected`. Reconnecting to the same device creates
//! a new link with its own state machine.

use std::fmt;

/// Link state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Link opened, notification subscription not yet confirmed.
    Connecting,
    /// Subscribed to notifications; writes are allowed.
    Ready,
    /// Link is gone. Terminal.
    Disconnected {
        /// Why the link ended.
        reason: CloseReason,
    },
}

impl LinkState {
    /// Create a new state machine in the Connecting state.
    pub fn new() -> Self {
        Self::Connecting
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (chat-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: LinkEvent) -> (Self, Vec<LinkAction>) {
        match (self, event) {
            // From Connecting
            (Self::Connecting, LinkEvent::Subscribed) => (
                Self::Ready,
                vec![
                    LinkAction::StartInbound,
                    LinkAction::Notify(LinkNotice::Ready),
                ],
            ),
            (Self::Connecting, LinkEvent::SubscribeFailed { error }) => (
                Self::Disconnected {
                    reason: CloseReason::SubscribeFailed(error),
                },
                vec![LinkAction::CloseTransport, LinkAction::Unregister],
            ),
            (Self::Connecting, LinkEvent::TeardownRequested) => (
                Self::Disconnected {
                    reason: CloseReason::Requested,
                },
                vec![LinkAction::CloseTransport],
            ),
            (Self::Connecting, LinkEvent::LinkLost { reason }) => (
                Self::Disconnected {
                    reason: CloseReason::Lost(reason),
                },
                vec![LinkAction::Unregister],
            ),

            // From Ready
            (Self::Ready, LinkEvent::TeardownRequested) => {
                let reason = CloseReason::Requested;
                (
                    Self::Disconnected {
                        reason: reason.clone(),
                    },
                    vec![
                        LinkAction::CloseTransport,
                        LinkAction::Notify(LinkNotice::Closed { reason }),
                    ],
                )
            }
            (Self::Ready, LinkEvent::LinkLost { reason }) => {
                let reason = CloseReason::Lost(reason);
                (
                    Self::Disconnected {
                        reason: reason.clone(),
                    },
                    vec![
                        LinkAction::Unregister,
                        LinkAction::Notify(LinkNotice::Closed { reason }),
                    ],
                )
            }

            // Invalid transitions (including anything after Disconnected) - stay put
            (state, _) => (state, vec![]),
        }
    }

    /// Check if writes are allowed.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if the link has ended.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Ready => f.write_str("ready"),
            Self::Disconnected { reason } => write!(f, "disconnected ({})", reason),
        }
    }
}

/// Events that can occur in a link's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Notification subscription established.
    Subscribed,
    /// Notification subscription failed.
    SubscribeFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Local side asked to disconnect.
    TeardownRequested,
    /// Transport reported the link as lost.
    LinkLost {
        /// Reason reported by the transport.
        reason: String,
    },
}

/// Why a link ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit local disconnect.
    Requested,
    /// Transport lost the link.
    Lost(String),
    /// The link never became ready.
    SubscribeFailed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("disconnect requested"),
            Self::Lost(reason) => write!(f, "link lost: {}", reason),
            Self::SubscribeFailed(error) => write!(f, "subscribe failed: {}", error),
        }
    }
}

/// Actions to be executed by chat-client.
///
/// These are instructions, not side effects. The registry interprets
/// these and performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// Start forwarding inbound notifications to the engine.
    StartInbound,
    /// Close the transport link.
    CloseTransport,
    /// Remove this link from the registry.
    Unregister,
    /// Tell the application about a lifecycle change.
    Notify(LinkNotice),
}

/// Lifecycle changes surfaced to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkNotice {
    /// Link became ready.
    Ready,
    /// A ready link ended.
    Closed {
        /// Why the link ended.
        reason: CloseReason,
    },
}

//! # chat-core
//!
//! Pure logic for linkchat (no I/O, instant tests).
//!
//! This crate implements the peer link state machine and the message
//! acceptance rules without any radio or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (transport, storage) is performed by `chat-client`, which
//! interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compose;
pub mod state;

pub use compose::{classify_inbound, compose, Inbound};
pub use state::{CloseReason, LinkAction, LinkEvent, LinkNotice, LinkState};

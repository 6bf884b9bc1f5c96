//! # chat-client
//!
//! Peer link management and message sync engine for linkchat.
//!
//! This is the main library that applications use to chat with nearby devices.
//!
//! ## Features
//!
//! - **Transport Abstraction**: Pluggable short-range link layer (mock included)
//! - **Peer Registry**: At most one link per device, concurrent connects and writes
//! - **Fan-out Isolation**: A slow or failing peer never delays the others
//! - **Durable Log**: SQLite-backed, replayable in timestamp order
//! - **Pure State Machine**: Uses chat-core for side-effect-free link logic
//!
//! ## Example
//!
//! ```ignore
//! use chat_client::{EngineConfig, MockTransport, SqliteStore, SyncEngine};
//!
//! let store = SqliteStore::open(path).await?;
//! let (engine, mut events) = SyncEngine::start(MockTransport::new(), store, EngineConfig::default()).await?;
//!
//! engine.discover_and_connect().await?;
//! engine.send_local("hi").await?;
//!
//! while let Some(event) = events.recv().await {
//!     // render
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod engine;
pub mod event;
pub mod peer;
pub mod registry;
pub mod store;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineConfig, EngineError, ReceiveOutcome, SendReport, SyncEngine};
pub use event::ChatEvent;
pub use peer::{PeerLink, PeerSummary, WriteError};
pub use registry::{ConnectError, ConnectOutcome, Delivery, Notification, PeerRegistry};
pub use store::{MessageStore, SqliteStore, StoreError};
pub use transport::{
    DiscoveredDevice, DiscoveryFilter, LinkHandle, MockTransport, Transport, TransportError,
    DEFAULT_SERVICE,
};

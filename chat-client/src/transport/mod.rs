//! Transport abstraction for linkchat.
//!
//! This module provides a pluggable transport layer that abstracts the
//! short-range radio stack (discovery, pairing, raw read/write). linkchat
//! never speaks the radio protocol itself; it only calls this capability.
//!
//! # Design
//!
//! The transport trait is async and link-oriented:
//! - `discover()` finds a nearby device advertising the service
//! - `open()` opens a low-level link and returns a [`LinkHandle`]
//! - `subscribe()` returns the link's inbound notification stream
//! - `write()` transmits one payload, best effort
//! - `link_lost()` resolves when the transport drops the link
//! - `close()` tears the link down
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.add_device("peer-a", Some("Alice's phone"));
//! let device = transport.discover(&DiscoveryFilter::default()).await?;
//! let link = transport.open(&device).await?;
//! let mut notifications = transport.subscribe(&link).await?;
//! transport.write(&link, payload).await?;
//! ```

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use chat_types::DeviceId;
use thiserror::Error;
use tokio::sync::mpsc;

/// Service identifier advertised by linkchat devices.
pub const DEFAULT_SERVICE: &str = "linkchat";

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The radio stack is missing, disabled, or not permitted.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// No matching device was found.
    #[error("no matching device found")]
    DeviceNotFound,

    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Notification subscription failed.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// What discovery should look for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFilter {
    /// Advertised service identifier.
    pub service: String,
    /// Only match devices whose name starts with this prefix.
    pub name_prefix: Option<String>,
}

impl DiscoveryFilter {
    /// Filter for the given service.
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            name_prefix: None,
        }
    }

    /// Restrict matches to device names starting with `prefix`.
    pub fn with_name_prefix(mut self, prefix: &str) -> Self {
        self.name_prefix = Some(prefix.to_string());
        self
    }

    /// Check whether a device advertising `service` under `name` matches.
    pub fn matches(&self, service: &str, name: Option<&str>) -> bool {
        if service != self.service {
            return false;
        }
        match (&self.name_prefix, name) {
            (None, _) => true,
            (Some(prefix), Some(name)) => name.starts_with(prefix.as_str()),
            (Some(_), None) => false,
        }
    }
}

impl Default for DiscoveryFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE)
    }
}

/// A device found by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Stable device identifier.
    pub id: DeviceId,
    /// Advertised name, if any.
    pub name: Option<String>,
}

impl DiscoveredDevice {
    /// Create a discovered device.
    pub fn new(id: impl Into<DeviceId>, name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
        }
    }
}

/// Opaque capability for one open link.
///
/// Issued by [`Transport::open`] and only meaningful to the transport that
/// issued it. Two opens of the same device yield different handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkHandle {
    device_id: DeviceId,
    token: u64,
}

impl LinkHandle {
    /// Create a handle. Only transports should call this.
    pub fn new(device_id: DeviceId, token: u64) -> Self {
        Self { device_id, token }
    }

    /// Device this link is open to.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Transport-specific token distinguishing this link.
    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Transport trait for the short-range link layer.
///
/// Implementations wrap a concrete radio stack (or a mock). Every method may
/// suspend; linkchat runs calls for different links concurrently.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Check that the radio stack can be used at all.
    async fn availability(&self) -> Result<(), TransportError>;

    /// Find one nearby device matching the filter.
    async fn discover(&self, filter: &DiscoveryFilter) -> Result<DiscoveredDevice, TransportError>;

    /// Open a low-level link to a discovered device.
    async fn open(&self, device: &DiscoveredDevice) -> Result<LinkHandle, TransportError>;

    /// Subscribe to the link's inbound notifications.
    ///
    /// Each received item is exactly one physical notification. The stream
    /// ends when the link goes away.
    async fn subscribe(&self, link: &LinkHandle) -> Result<mpsc::Receiver<Vec<u8>>, TransportError>;

    /// Send one payload. No retry.
    async fn write(&self, link: &LinkHandle, data: &[u8]) -> Result<(), TransportError>;

    /// Resolve when the transport loses the link, with a reason.
    ///
    /// May be awaited at any point after `open`, including before `subscribe`.
    /// Never resolves for a link that stays up.
    async fn link_lost(&self, link: &LinkHandle) -> String;

    /// Close the link.
    async fn close(&self, link: &LinkHandle) -> Result<(), TransportError>;
}

//! SyncEngine - the main interface for linkchat.
//!
//! This module provides [`SyncEngine`], the primary API for applications to
//! exchange messages with nearby devices.
//!
//! # Architecture
//!
//! ```text
//! send_local ─► MessageStore.append ─► ChatEvent ─► encode ─► PeerRegistry.broadcast
//!
//! PeerLink task ─► inbound queue ─► router ─► receive_remote ─► decode
//!                                               └─► echo guard ─► append ─► ChatEvent
//! ```
//!
//! A message is always persisted before it is rendered or broadcast. Appends
//! and event emission run under one accept lock, so events arrive in the order
//! messages were accepted. Link setup and peer writes never take that lock.
//!
//! # Example
//!
//! ```ignore
//! use chat_client::{EngineConfig, MockTransport, SqliteStore, SyncEngine};
//!
//! let store = SqliteStore::open(path).await?;
//! let (engine, mut events) = SyncEngine::start(MockTransport::new(), store, EngineConfig::default()).await?;
//!
//! engine.claim_profile("alice").await?;
//! engine.discover_and_connect().await?;
//! engine.send_local("hi").await?;
//! ```

use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;

use chat_core::{classify_inbound, compose, Inbound};
use chat_types::{codec, CodecError, DecodeError, DeviceId, Message, NewMessage, Profile};

use crate::clock::{Clock, SystemClock};
use crate::event::ChatEvent;
use crate::peer::PeerSummary;
use crate::registry::{ConnectError, ConnectOutcome, Delivery, Notification, PeerRegistry};
use crate::store::{MessageStore, StoreError};
use crate::transport::{DiscoveredDevice, DiscoveryFilter, Transport, TransportError};

/// Default capacity of the inbound notification queue.
pub const DEFAULT_INBOUND_QUEUE: usize = 64;

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The transport cannot be used; no links were started.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(#[source] TransportError),

    /// Discovery failed.
    #[error("discovery failed: {0}")]
    Discovery(#[source] TransportError),

    /// Connecting to a peer failed.
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Encoding error.
    #[error("encoding error: {0}")]
    Codec(#[from] CodecError),

    /// Username is empty or whitespace.
    #[error("username must not be empty")]
    InvalidUsername,

    /// A profile already exists on this device.
    #[error("profile already set")]
    ProfileAlreadySet,
}

/// Configuration for SyncEngine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// What discovery looks for.
    pub discovery: DiscoveryFilter,
    /// Capacity of the queue between peer links and the inbound router.
    pub inbound_queue: usize,
}

impl EngineConfig {
    /// Set the discovery filter.
    pub fn with_discovery(mut self, discovery: DiscoveryFilter) -> Self {
        self.discovery = discovery;
        self
    }

    /// Set the inbound queue capacity (at least 1).
    pub fn with_inbound_queue(mut self, capacity: usize) -> Self {
        self.inbound_queue = capacity.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryFilter::default(),
            inbound_queue: DEFAULT_INBOUND_QUEUE,
        }
    }
}

/// Result of a local send that was not a no-op.
#[derive(Debug)]
pub struct SendReport {
    /// The persisted message.
    pub message: Message,
    /// Per-peer write outcomes, ordered by device id.
    pub deliveries: Vec<Delivery>,
}

impl SendReport {
    /// Number of peers the message reached.
    pub fn delivered(&self) -> usize {
        self.deliveries.iter().filter(|d| d.is_delivered()).count()
    }

    /// Number of peers whose write failed.
    pub fn failed(&self) -> usize {
        self.deliveries.len() - self.delivered()
    }
}

/// What happened to one inbound payload.
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// Persisted and rendered.
    Accepted(Message),
    /// Authored under the local username; dropped.
    SelfEcho,
    /// Not a valid message; dropped.
    Malformed(DecodeError),
}

/// The linkchat engine.
///
/// Cheap to clone; clones drive the same store, registry, and event stream.
/// The event stream closes once every clone is dropped and no link is live.
pub struct SyncEngine<T: Transport, S: MessageStore> {
    transport: Arc<T>,
    registry: PeerRegistry<T>,
    config: EngineConfig,
    inbox: Arc<Inbox<S>>,
    clock: Arc<dyn Clock>,
    router: Arc<OnceLock<AbortHandle>>,
}

/// The accept path shared by local sends and the inbound router.
///
/// Holds no registry handle, so the router it runs does not keep the
/// inbound queue open.
struct Inbox<S: MessageStore> {
    store: Arc<S>,
    profile: OnceLock<Profile>,
    accept_lock: Mutex<()>,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl<T: Transport, S: MessageStore> Clone for SyncEngine<T, S> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            registry: self.registry.clone(),
            config: self.config.clone(),
            inbox: Arc::clone(&self.inbox),
            clock: Arc::clone(&self.clock),
            router: Arc::clone(&self.router),
        }
    }
}

impl<T: Transport, S: MessageStore> std::fmt::Debug for SyncEngine<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("profile", &self.inbox.profile.get())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<T: Transport, S: MessageStore> SyncEngine<T, S> {
    /// Start the engine with the system clock.
    pub async fn start(
        transport: T,
        store: S,
        config: EngineConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChatEvent>), EngineError> {
        Self::start_with_clock(transport, store, config, Arc::new(SystemClock)).await
    }

    /// Start the engine with an explicit clock.
    ///
    /// Fails with [`EngineError::TransportUnavailable`] before anything else
    /// happens when the transport cannot be used.
    pub async fn start_with_clock(
        transport: T,
        store: S,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChatEvent>), EngineError> {
        transport
            .availability()
            .await
            .map_err(EngineError::TransportUnavailable)?;

        let profile = OnceLock::new();
        if let Some(stored) = store.get_profile().await? {
            tracing::debug!("Loaded profile for {}", stored.username);
            let _ = profile.set(stored);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue.max(1));
        let transport = Arc::new(transport);
        let registry = PeerRegistry::new(Arc::clone(&transport), inbound_tx, events_tx.clone());

        let inbox = Arc::new(Inbox {
            store: Arc::new(store),
            profile,
            accept_lock: Mutex::new(()),
            events: events_tx,
        });

        let router = tokio::spawn(Arc::clone(&inbox).route(inbound_rx));

        let engine = Self {
            transport,
            registry,
            config,
            inbox,
            clock,
            router: Arc::new(OnceLock::new()),
        };
        let _ = engine.router.set(router.abort_handle());

        tracing::info!("Engine started");
        Ok((engine, events_rx))
    }

    /// The local profile, if claimed.
    pub fn profile(&self) -> Option<&Profile> {
        self.inbox.profile.get()
    }

    /// The configuration the engine was started with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create the local profile.
    ///
    /// Only one profile may ever exist per device; a second claim fails with
    /// [`EngineError::ProfileAlreadySet`], including one loaded at startup.
    pub async fn claim_profile(&self, username: &str) -> Result<Profile, EngineError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(EngineError::InvalidUsername);
        }

        let _guard = self.inbox.accept_lock.lock().await;
        if self.inbox.profile.get().is_some() {
            return Err(EngineError::ProfileAlreadySet);
        }

        let profile = Profile::new(username);
        self.inbox.store.set_profile(&profile).await?;
        let _ = self.inbox.profile.set(profile.clone());

        tracing::info!("Profile claimed: {}", profile.username);
        Ok(profile)
    }

    /// Compose, persist, render, and broadcast a local message.
    ///
    /// Returns `Ok(None)` without side effects when `text` is blank or no
    /// profile exists. Peer write failures are reported in the
    /// [`SendReport`], never as an error; the message stays stored either way.
    pub async fn send_local(&self, text: &str) -> Result<Option<SendReport>, EngineError> {
        let Some(draft) = compose(text, self.profile(), self.clock.now_millis()) else {
            tracing::debug!("Ignoring send: blank text or no profile");
            return Ok(None);
        };

        let message = self.inbox.accept(draft, true).await?;
        let payload = codec::encode(&message)?;
        let deliveries = self.registry.broadcast(&payload).await;

        for delivery in &deliveries {
            if let Err(e) = &delivery.outcome {
                tracing::warn!(
                    "Failed to deliver message {} to {}: {}",
                    message.id,
                    delivery.device_id,
                    e
                );
            }
        }

        Ok(Some(SendReport {
            message,
            deliveries,
        }))
    }

    /// Handle one inbound payload from a peer.
    ///
    /// Malformed payloads and self-echoes are dropped without touching the
    /// store. Only a storage failure is an error.
    pub async fn receive_remote(
        &self,
        payload: &[u8],
        from: &DeviceId,
    ) -> Result<ReceiveOutcome, EngineError> {
        self.inbox.receive(payload, from).await
    }

    /// Discover one device with the configured filter and connect to it.
    pub async fn discover_and_connect(&self) -> Result<ConnectOutcome, EngineError> {
        let device = self
            .transport
            .discover(&self.config.discovery)
            .await
            .map_err(EngineError::Discovery)?;
        tracing::debug!("Discovered {}", device.id);
        self.connect(device).await
    }

    /// Connect to an already discovered device.
    pub async fn connect(&self, device: DiscoveredDevice) -> Result<ConnectOutcome, EngineError> {
        Ok(self.registry.connect(device).await?)
    }

    /// Disconnect from a peer. Returns false when it was not connected.
    pub async fn disconnect(&self, device_id: &DeviceId) -> bool {
        self.registry.remove(device_id).await
    }

    /// Ready peers, ordered by device id.
    pub fn peers(&self) -> Vec<PeerSummary> {
        self.registry.list_active()
    }

    /// Full stored history, ordered by timestamp then id.
    pub async fn history(&self) -> Result<Vec<Message>, EngineError> {
        Ok(self.inbox.store.load_all().await?)
    }

    /// Tear down every link and stop routing inbound payloads.
    pub async fn shutdown(&self) {
        if let Some(router) = self.router.get() {
            router.abort();
        }
        self.registry.remove_all().await;
        tracing::info!("Engine stopped");
    }
}

impl<S: MessageStore> Inbox<S> {
    /// Persist a message and emit its event, in accepted order.
    async fn accept(&self, draft: NewMessage, mine: bool) -> Result<Message, EngineError> {
        let _guard = self.accept_lock.lock().await;
        let message = self.store.append(draft).await?;
        let _ = self.events.send(ChatEvent::Message {
            message: message.clone(),
            mine,
        });
        Ok(message)
    }

    async fn receive(&self, payload: &[u8], from: &DeviceId) -> Result<ReceiveOutcome, EngineError> {
        let decoded = match codec::decode(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!("Dropping malformed payload from {}: {}", from, e);
                return Ok(ReceiveOutcome::Malformed(e));
            }
        };

        match classify_inbound(decoded, self.profile.get()) {
            Inbound::SelfEcho => {
                tracing::debug!("Dropping self-echo from {}", from);
                Ok(ReceiveOutcome::SelfEcho)
            }
            Inbound::Accept(draft) => {
                let message = self.accept(draft, false).await?;
                tracing::debug!("Accepted message {} from {}", message.id, from);
                Ok(ReceiveOutcome::Accepted(message))
            }
        }
    }

    /// Runs until every inbound sender is gone.
    async fn route(self: Arc<Self>, mut inbound: mpsc::Receiver<Notification>) {
        while let Some(notification) = inbound.recv().await {
            if let Err(e) = self
                .receive(&notification.payload, &notification.device_id)
                .await
            {
                tracing::error!(
                    "Failed to store message from {}: {}",
                    notification.device_id,
                    e
                );
            }
        }
        tracing::debug!("Inbound router stopped");
    }
}

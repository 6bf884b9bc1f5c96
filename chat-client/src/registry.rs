//! Registry of live peer links, keyed by device id.
//!
//! The registry owns every [`PeerLink`]. It guarantees at most one live or
//! in-progress link per device, forwards each link's inbound notifications to
//! a single queue, and removes links when the transport reports them lost.
//!
//! # Link identity
//!
//! Every connect attempt gets a fresh `link_id`. Loss signals and late
//! connect completions carry the id of the link they belong to, so a stale
//! signal from an old link never removes a newer link to the same device.

use crate::event::ChatEvent;
use crate::peer::{PeerLink, PeerSummary, WriteError};
use crate::transport::{DiscoveredDevice, Transport, TransportError};
use chat_core::{LinkAction, LinkEvent, LinkNotice, LinkState};
use chat_types::DeviceId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Connecting to a peer failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The transport could not open the link.
    #[error("failed to open link: {0}")]
    Open(#[source] TransportError),

    /// The link opened but notifications could not be subscribed.
    #[error("failed to subscribe: {0}")]
    Subscribe(#[source] TransportError),

    /// The transport dropped the link before it became ready.
    #[error("link lost while connecting: {0}")]
    LostWhileConnecting(String),

    /// The peer was removed while the connect was in progress.
    #[error("connect cancelled")]
    Cancelled,
}

/// Result of a successful connect call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new link is ready.
    Connected(PeerSummary),
    /// A link to this device already exists or is being set up.
    AlreadyConnected,
}

/// Outcome of writing a broadcast payload to one peer.
#[derive(Debug)]
pub struct Delivery {
    /// Peer the payload was written to.
    pub device_id: DeviceId,
    /// Write result.
    pub outcome: Result<(), WriteError>,
}

impl Delivery {
    /// Whether the write succeeded.
    pub fn is_delivered(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// One inbound notification, tagged with the device it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Sending device.
    pub device_id: DeviceId,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

enum Slot<T: Transport> {
    Pending { link_id: u64 },
    Live(Arc<PeerLink<T>>),
}

impl<T: Transport> Slot<T> {
    fn link_id(&self) -> u64 {
        match self {
            Self::Pending { link_id } => *link_id,
            Self::Live(link) => link.link_id(),
        }
    }
}

/// Registry of peer links.
///
/// Cheap to clone; clones share the same links.
pub struct PeerRegistry<T: Transport> {
    transport: Arc<T>,
    slots: Arc<DashMap<DeviceId, Slot<T>>>,
    next_link_id: Arc<AtomicU64>,
    inbound: mpsc::Sender<Notification>,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl<T: Transport> Clone for PeerRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            slots: Arc::clone(&self.slots),
            next_link_id: Arc::clone(&self.next_link_id),
            inbound: self.inbound.clone(),
            events: self.events.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for PeerRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> PeerRegistry<T> {
    /// Create an empty registry.
    ///
    /// Inbound notifications from every link are sent to `inbound`; lifecycle
    /// changes are sent to `events`.
    pub fn new(
        transport: Arc<T>,
        inbound: mpsc::Sender<Notification>,
        events: mpsc::UnboundedSender<ChatEvent>,
    ) -> Self {
        Self {
            transport,
            slots: Arc::new(DashMap::new()),
            next_link_id: Arc::new(AtomicU64::new(1)),
            inbound,
            events,
        }
    }

    /// Connect to a discovered device.
    ///
    /// Returns [`ConnectOutcome::AlreadyConnected`] without touching the
    /// transport when a link to the device is live or still connecting.
    pub async fn connect(&self, device: DiscoveredDevice) -> Result<ConnectOutcome, ConnectError> {
        let link_id = self.next_link_id.fetch_add(1, Ordering::Relaxed);

        // Reserve the slot before any await so concurrent connects see it.
        match self.slots.entry(device.id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!("Already connected to {}", device.id);
                return Ok(ConnectOutcome::AlreadyConnected);
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::Pending { link_id });
            }
        }

        tracing::debug!("Connecting to {} (link {})", device.id, link_id);

        let handle = match self.transport.open(&device).await {
            Ok(handle) => handle,
            Err(e) => {
                self.release(&device.id, link_id);
                tracing::warn!("Failed to open link to {}: {}", device.id, e);
                return Err(ConnectError::Open(e));
            }
        };

        let link = Arc::new(PeerLink::new(
            link_id,
            device,
            handle,
            Arc::clone(&self.transport),
        ));

        enum Step {
            Subscribed(mpsc::Receiver<Vec<u8>>),
            Failed(TransportError),
            Lost(String),
        }

        let step = tokio::select! {
            result = self.transport.subscribe(link.handle()) => match result {
                Ok(rx) => Step::Subscribed(rx),
                Err(e) => Step::Failed(e),
            },
            reason = self.transport.link_lost(link.handle()) => Step::Lost(reason),
        };

        let notifications = match step {
            Step::Subscribed(rx) => rx,
            Step::Failed(e) => {
                tracing::warn!("Failed to subscribe to {}: {}", link.device_id(), e);
                let actions = link.apply(LinkEvent::SubscribeFailed {
                    error: e.to_string(),
                });
                self.run_actions(&link, actions, None).await;
                return Err(ConnectError::Subscribe(e));
            }
            Step::Lost(reason) => {
                tracing::warn!("Lost {} while connecting: {}", link.device_id(), reason);
                let actions = link.apply(LinkEvent::LinkLost {
                    reason: reason.clone(),
                });
                self.run_actions(&link, actions, None).await;
                return Err(ConnectError::LostWhileConnecting(reason));
            }
        };

        // Promote and mark Ready under the slot guard; remove() may have run
        // meanwhile. The Ready actions never touch the slot map.
        let mut notifications = Some(notifications);
        let summary = match self.slots.get_mut(link.device_id()) {
            Some(mut slot) if slot.link_id() == link_id => {
                *slot = Slot::Live(Arc::clone(&link));
                let actions = link.apply(LinkEvent::Subscribed);
                self.dispatch(&link, actions, &mut notifications);
                Some(link.summary())
            }
            _ => None,
        };

        match summary {
            Some(summary) => Ok(ConnectOutcome::Connected(summary)),
            None => {
                tracing::debug!("Connect to {} cancelled", link.device_id());
                let actions = link.apply(LinkEvent::TeardownRequested);
                self.run_actions(&link, actions, None).await;
                Err(ConnectError::Cancelled)
            }
        }
    }

    /// Tear down and forget the link to a device.
    ///
    /// Cancels an in-progress connect. Returns false when the device is unknown.
    pub async fn remove(&self, device_id: &DeviceId) -> bool {
        match self.slots.remove(device_id) {
            None => false,
            Some((_, Slot::Pending { link_id })) => {
                tracing::debug!("Cancelled pending connect to {} (link {})", device_id, link_id);
                true
            }
            Some((_, Slot::Live(link))) => {
                let actions = link.apply(LinkEvent::TeardownRequested);
                self.run_actions(&link, actions, None).await;
                true
            }
        }
    }

    /// Tear down every link.
    pub async fn remove_all(&self) {
        let devices: Vec<DeviceId> = self.slots.iter().map(|e| e.key().clone()).collect();
        for device_id in devices {
            self.remove(&device_id).await;
        }
    }

    /// Write one payload to every ready peer concurrently.
    ///
    /// One slow or failing peer never blocks the others. Results are ordered
    /// by device id.
    pub async fn broadcast(&self, payload: &[u8]) -> Vec<Delivery> {
        let mut links = self.ready_links();
        links.sort_by(|a, b| a.device_id().cmp(b.device_id()));

        let writes = links.iter().map(|link| async move {
            Delivery {
                device_id: link.device_id().clone(),
                outcome: link.write(payload).await,
            }
        });
        join_all(writes).await
    }

    /// Summaries of every ready peer, ordered by device id.
    pub fn list_active(&self) -> Vec<PeerSummary> {
        let mut peers: Vec<PeerSummary> = self.ready_links().iter().map(|l| l.summary()).collect();
        peers.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        peers
    }

    /// Whether a ready link to the device exists.
    pub fn is_connected(&self, device_id: &DeviceId) -> bool {
        self.slots
            .get(device_id)
            .map(|slot| matches!(&*slot, Slot::Live(link) if link.state().is_ready()))
            .unwrap_or(false)
    }

    /// Number of live or connecting entries.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn ready_links(&self) -> Vec<Arc<PeerLink<T>>> {
        self.slots
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Live(link) if link.state().is_ready() => Some(Arc::clone(link)),
                _ => None,
            })
            .collect()
    }

    /// Remove the entry for `device_id` only if it still belongs to `link_id`.
    fn release(&self, device_id: &DeviceId, link_id: u64) {
        if self
            .slots
            .remove_if(device_id, |_, slot| slot.link_id() == link_id)
            .is_some()
        {
            tracing::debug!("Unregistered {} (link {})", device_id, link_id);
        }
    }

    async fn run_actions(
        &self,
        link: &Arc<PeerLink<T>>,
        actions: Vec<LinkAction>,
        mut notifications: Option<mpsc::Receiver<Vec<u8>>>,
    ) {
        if self.dispatch(link, actions, &mut notifications) {
            if let Err(e) = self.transport.close(link.handle()).await {
                tracing::debug!("Close of {} failed: {}", link.device_id(), e);
            }
        }
    }

    /// Execute the synchronous actions. Returns true when the transport
    /// link should be closed.
    fn dispatch(
        &self,
        link: &Arc<PeerLink<T>>,
        actions: Vec<LinkAction>,
        notifications: &mut Option<mpsc::Receiver<Vec<u8>>>,
    ) -> bool {
        let mut close = false;
        for action in actions {
            match action {
                LinkAction::StartInbound => {
                    if let Some(rx) = notifications.take() {
                        self.spawn_link_task(Arc::clone(link), rx);
                    }
                }
                LinkAction::CloseTransport => close = true,
                LinkAction::Unregister => self.release(link.device_id(), link.link_id()),
                LinkAction::Notify(LinkNotice::Ready) => {
                    tracing::info!("Connected to {}", link.device_id());
                    let _ = self.events.send(ChatEvent::PeerConnected(link.summary()));
                }
                LinkAction::Notify(LinkNotice::Closed { reason }) => {
                    tracing::info!("Disconnected from {}: {}", link.device_id(), reason);
                    let _ = self.events.send(ChatEvent::PeerDisconnected {
                        device_id: link.device_id().clone(),
                        reason,
                    });
                }
            }
        }
        close
    }

    /// Forward the link's notifications until it ends, then report loss.
    fn spawn_link_task(&self, link: Arc<PeerLink<T>>, mut notifications: mpsc::Receiver<Vec<u8>>) {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut state = link.watch_state();
            let lost = registry.transport.link_lost(link.handle());
            let closed = async move {
                let _ = state.wait_for(LinkState::is_disconnected).await;
            };
            tokio::pin!(lost);
            tokio::pin!(closed);

            // Queued payloads are forwarded before a loss is acted on.
            let reason = loop {
                tokio::select! {
                    biased;
                    payload = notifications.recv() => match payload {
                        Some(payload) => {
                            let notification = Notification {
                                device_id: link.device_id().clone(),
                                payload,
                            };
                            if registry.inbound.send(notification).await.is_err() {
                                tracing::debug!("Inbound queue closed, stopping reader for {}", link.device_id());
                                break None;
                            }
                        }
                        None => {
                            if link.state().is_disconnected() {
                                break None;
                            }
                            break Some(
                                (&mut lost)
                                    .now_or_never()
                                    .unwrap_or_else(|| "notification stream ended".to_string()),
                            );
                        }
                    },
                    reason = &mut lost => break Some(reason),
                    _ = &mut closed => break None,
                }
            };

            if let Some(reason) = reason {
                let actions = link.apply(LinkEvent::LinkLost { reason });
                registry.dispatch(&link, actions, &mut None);
            }
        });
    }
}

//! One live link to one remote device.

use crate::transport::{DiscoveredDevice, LinkHandle, Transport, TransportError};
use chat_core::{LinkAction, LinkEvent, LinkState};
use chat_types::DeviceId;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Writing to a peer failed.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The link has not finished connecting.
    #[error("link is not ready")]
    NotReady,

    /// The link disconnected before or during the write.
    #[error("link closed")]
    LinkClosed,

    /// The transport rejected the write.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Snapshot of a peer for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    /// Remote device.
    pub device_id: DeviceId,
    /// Name advertised during discovery, if any.
    pub display_name: Option<String>,
    /// Link state at the time of the snapshot.
    pub state: LinkState,
}

impl fmt::Display for PeerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{} ({}) [{}]", name, self.device_id, self.state),
            None => write!(f, "{} [{}]", self.device_id, self.state),
        }
    }
}

/// A link to one remote device.
///
/// State lives in a watch channel so that outstanding writes observe a
/// disconnect the moment it happens.
pub struct PeerLink<T: Transport> {
    link_id: u64,
    device: DiscoveredDevice,
    handle: LinkHandle,
    transport: Arc<T>,
    state: watch::Sender<LinkState>,
}

impl<T: Transport> PeerLink<T> {
    pub(crate) fn new(
        link_id: u64,
        device: DiscoveredDevice,
        handle: LinkHandle,
        transport: Arc<T>,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::new());
        Self {
            link_id,
            device,
            handle,
            transport,
            state,
        }
    }

    /// Remote device id.
    pub fn device_id(&self) -> &DeviceId {
        &self.device.id
    }

    /// Advertised name, if any.
    pub fn display_name(&self) -> Option<&str> {
        self.device.name.as_deref()
    }

    /// Identifier of this link instance. Reconnecting yields a new one.
    pub fn link_id(&self) -> u64 {
        self.link_id
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.state.borrow().clone()
    }

    /// Snapshot for display.
    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            device_id: self.device.id.clone(),
            display_name: self.device.name.clone(),
            state: self.state(),
        }
    }

    pub(crate) fn handle(&self) -> &LinkHandle {
        &self.handle
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Feed an event to the state machine and return the actions to run.
    pub(crate) fn apply(&self, event: LinkEvent) -> Vec<LinkAction> {
        let mut actions = Vec::new();
        self.state.send_if_modified(|state| {
            let before = state.clone();
            let (next, out) = before.clone().on_event(event);
            actions = out;
            *state = next;
            *state != before
        });
        actions
    }

    /// Write one payload to the peer.
    ///
    /// Fails fast unless the link is ready. A write in flight when the link
    /// disconnects resolves to [`WriteError::LinkClosed`] instead of hanging.
    pub async fn write(&self, data: &[u8]) -> Result<(), WriteError> {
        let mut state = self.state.subscribe();
        match &*state.borrow_and_update() {
            LinkState::Ready => {}
            LinkState::Connecting => return Err(WriteError::NotReady),
            LinkState::Disconnected { .. } => return Err(WriteError::LinkClosed),
        }

        tokio::select! {
            result = self.transport.write(&self.handle, data) => result.map_err(WriteError::from),
            _ = state.wait_for(LinkState::is_disconnected) => Err(WriteError::LinkClosed),
        }
    }
}

impl<T: Transport> fmt::Debug for PeerLink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("link_id", &self.link_id)
            .field("device", &self.device)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use chat_core::CloseReason;
    use std::time::Duration;

    async fn link_to(transport: &MockTransport, id: &str) -> PeerLink<MockTransport> {
        transport.add_device(id, Some("Phone"));
        let device = DiscoveredDevice::new(id, Some("Phone"));
        let handle = transport.open(&device).await.unwrap();
        PeerLink::new(1, device, handle, Arc::new(transport.clone()))
    }

    #[tokio::test]
    async fn write_before_ready_fails_fast() {
        let transport = MockTransport::new();
        let link = link_to(&transport, "peer-a").await;

        let result = link.write(b"data").await;
        assert!(matches!(result, Err(WriteError::NotReady)));
        assert!(transport.written_to("peer-a").is_empty());
    }

    #[tokio::test]
    async fn write_when_ready_reaches_transport() {
        let transport = MockTransport::new();
        let link = link_to(&transport, "peer-a").await;
        let _rx = transport.subscribe(link.handle()).await.unwrap();
        link.apply(LinkEvent::Subscribed);

        link.write(b"data").await.unwrap();
        assert_eq!(transport.written_to("peer-a"), vec![b"data".to_vec()]);
    }

    #[tokio::test]
    async fn write_after_disconnect_fails() {
        let transport = MockTransport::new();
        let link = link_to(&transport, "peer-a").await;
        link.apply(LinkEvent::Subscribed);
        link.apply(LinkEvent::TeardownRequested);

        let result = link.write(b"data").await;
        assert!(matches!(result, Err(WriteError::LinkClosed)));
    }

    #[tokio::test]
    async fn transport_failure_is_reported() {
        let transport = MockTransport::new();
        let link = link_to(&transport, "peer-a").await;
        let _rx = transport.subscribe(link.handle()).await.unwrap();
        link.apply(LinkEvent::Subscribed);
        transport.fail_writes_to("peer-a", "buffer full");

        let result = link.write(b"data").await;
        assert!(matches!(
            result,
            Err(WriteError::Transport(TransportError::SendFailed(_)))
        ));
    }

    #[tokio::test]
    async fn stalled_write_resolves_when_link_closes() {
        let transport = MockTransport::new();
        let link = Arc::new(link_to(&transport, "peer-a").await);
        let _rx = transport.subscribe(link.handle()).await.unwrap();
        link.apply(LinkEvent::Subscribed);
        transport.stall_writes_to("peer-a");

        let writer = {
            let link = link.clone();
            tokio::spawn(async move { link.write(b"data").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!writer.is_finished());

        link.apply(LinkEvent::LinkLost {
            reason: "out of range".into(),
        });

        let result = tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .expect("write should resolve")
            .unwrap();
        assert!(matches!(result, Err(WriteError::LinkClosed)));
    }

    #[tokio::test]
    async fn apply_runs_state_machine() {
        let transport = MockTransport::new();
        let link = link_to(&transport, "peer-a").await;

        let actions = link.apply(LinkEvent::Subscribed);
        assert!(actions.contains(&LinkAction::StartInbound));
        assert!(link.state().is_ready());

        link.apply(LinkEvent::TeardownRequested);
        assert_eq!(
            link.state(),
            LinkState::Disconnected {
                reason: CloseReason::Requested
            }
        );

        // Terminal: nothing further happens
        assert!(link.apply(LinkEvent::Subscribed).is_empty());
    }

    #[tokio::test]
    async fn summary_reflects_device_and_state() {
        let transport = MockTransport::new();
        let link = link_to(&transport, "peer-a").await;
        link.apply(LinkEvent::Subscribed);

        let summary = link.summary();
        assert_eq!(summary.device_id, DeviceId::from("peer-a"));
        assert_eq!(summary.display_name.as_deref(), Some("Phone"));
        assert_eq!(summary.to_string(), "Phone (peer-a) [ready]");
    }
}

//! Mock transport for testing.
//!
//! Simulates nearby devices, lets tests inject inbound notifications and link
//! loss, and captures written payloads for verification.

use super::{
    DiscoveredDevice, DiscoveryFilter, LinkHandle, Transport, TransportError, DEFAULT_SERVICE,
};
use async_trait::async_trait;
use chat_types::DeviceId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, Notify};

/// Capacity of each simulated notification stream.
const NOTIFICATION_BUFFER: usize = 64;

/// Mock transport for testing.
///
/// Clones share state, so a test can hand one clone to the engine and keep
/// another to drive the simulated radio.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    unavailable: Option<String>,
    devices: Vec<(DiscoveredDevice, String)>,
    links: HashMap<u64, MockLink>,
    next_token: u64,
    opened: Vec<DeviceId>,
    closed: Vec<DeviceId>,
    written: Vec<(DeviceId, Vec<u8>)>,
    fail_next_open: Option<String>,
    fail_next_subscribe: Option<String>,
    subscribe_gates: HashMap<DeviceId, Arc<Notify>>,
    failing_writes: HashMap<DeviceId, String>,
    stalled_writes: HashSet<DeviceId>,
}

#[derive(Debug)]
struct MockLink {
    device_id: DeviceId,
    notifications: Option<mpsc::Sender<Vec<u8>>>,
    lost: watch::Sender<Option<String>>,
    closed: bool,
}

impl MockLink {
    fn is_live(&self) -> bool {
        !self.closed && self.lost.borrow().is_none()
    }
}

impl MockTransport {
    /// Create a new mock transport with no devices in range.
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a device advertising the default service in range.
    pub fn add_device(&self, id: &str, name: Option<&str>) {
        self.add_device_advertising(id, name, DEFAULT_SERVICE);
    }

    /// Put a device advertising `service` in range.
    pub fn add_device_advertising(&self, id: &str, name: Option<&str>, service: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .devices
            .push((DiscoveredDevice::new(id, name), service.to_string()));
    }

    /// Make `availability()` and `open()` fail with the given reason.
    pub fn set_unavailable(&self, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.unavailable = Some(reason.to_string());
    }

    /// Cause the next open() to fail with the given error.
    pub fn fail_next_open(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_open = Some(error.to_string());
    }

    /// Cause the next subscribe() to fail with the given error.
    pub fn fail_next_subscribe(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_subscribe = Some(error.to_string());
    }

    /// Hold subscribe() calls for `device` until [`release_subscribe`](Self::release_subscribe).
    pub fn hold_subscribe(&self, device: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .subscribe_gates
            .insert(DeviceId::from(device), Arc::new(Notify::new()));
    }

    /// Let a held subscribe() for `device` complete.
    pub fn release_subscribe(&self, device: &str) {
        let gate = {
            let mut inner = self.inner.lock().unwrap();
            inner.subscribe_gates.remove(&DeviceId::from(device))
        };
        if let Some(gate) = gate {
            gate.notify_one();
        }
    }

    /// Make every write() to `device` fail with the given error.
    pub fn fail_writes_to(&self, device: &str, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .failing_writes
            .insert(DeviceId::from(device), error.to_string());
    }

    /// Make every write() to `device` hang until the link goes away.
    pub fn stall_writes_to(&self, device: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.stalled_writes.insert(DeviceId::from(device));
    }

    /// Deliver one notification from `device` on its newest live link.
    ///
    /// Returns false when no subscribed link to the device exists.
    pub async fn deliver(&self, device: &str, payload: &[u8]) -> bool {
        let sender = {
            let inner = self.inner.lock().unwrap();
            let device = DeviceId::from(device);
            inner
                .links
                .iter()
                .filter(|(_, link)| link.device_id == device && link.is_live())
                .max_by_key(|(token, _)| **token)
                .and_then(|(_, link)| link.notifications.clone())
        };
        match sender {
            Some(sender) => sender.send(payload.to_vec()).await.is_ok(),
            None => false,
        }
    }

    /// Simulate the radio losing every live link to `device`.
    pub fn drop_link(&self, device: &str, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        let device = DeviceId::from(device);
        for link in inner.links.values_mut() {
            if link.device_id == device && link.is_live() {
                link.notifications = None;
                link.lost.send_replace(Some(reason.to_string()));
            }
        }
    }

    /// Payloads written to `device`, in order.
    pub fn written_to(&self, device: &str) -> Vec<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        let device = DeviceId::from(device);
        inner
            .written
            .iter()
            .filter(|(to, _)| *to == device)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Number of successful open() calls for `device`.
    pub fn open_count(&self, device: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        let device = DeviceId::from(device);
        inner.opened.iter().filter(|d| **d == device).count()
    }

    /// Number of close() calls for `device`.
    pub fn close_count(&self, device: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        let device = DeviceId::from(device);
        inner.closed.iter().filter(|d| **d == device).count()
    }

    /// Whether a live (open, not lost, not closed) link to `device` exists.
    pub fn is_linked(&self, device: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        let device = DeviceId::from(device);
        inner
            .links
            .values()
            .any(|link| link.device_id == device && link.is_live())
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn availability(&self) -> Result<(), TransportError> {
        let inner = self.inner.lock().unwrap();
        match &inner.unavailable {
            Some(reason) => Err(TransportError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    async fn discover(&self, filter: &DiscoveryFilter) -> Result<DiscoveredDevice, TransportError> {
        let inner = self.inner.lock().unwrap();

        if let Some(reason) = &inner.unavailable {
            return Err(TransportError::Unavailable(reason.clone()));
        }

        let linked = |id: &DeviceId| {
            inner
                .links
                .values()
                .any(|link| link.device_id == *id && link.is_live())
        };
        let mut matching = inner
            .devices
            .iter()
            .filter(|(device, service)| filter.matches(service, device.name.as_deref()))
            .map(|(device, _)| device);

        // Prefer devices we are not already linked to
        let first = matching.clone().next().cloned();
        matching
            .find(|device| !linked(&device.id))
            .cloned()
            .or(first)
            .ok_or(TransportError::DeviceNotFound)
    }

    async fn open(&self, device: &DiscoveredDevice) -> Result<LinkHandle, TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(reason) = &inner.unavailable {
            return Err(TransportError::Unavailable(reason.clone()));
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_open.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        if !inner.devices.iter().any(|(d, _)| d.id == device.id) {
            return Err(TransportError::DeviceNotFound);
        }

        inner.next_token += 1;
        let token = inner.next_token;
        let (lost, _) = watch::channel(None);
        inner.links.insert(
            token,
            MockLink {
                device_id: device.id.clone(),
                notifications: None,
                lost,
                closed: false,
            },
        );
        inner.opened.push(device.id.clone());
        Ok(LinkHandle::new(device.id.clone(), token))
    }

    async fn subscribe(&self, link: &LinkHandle) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        let gate = {
            let inner = self.inner.lock().unwrap();
            inner.subscribe_gates.get(link.device_id()).cloned()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_next_subscribe.take() {
            return Err(TransportError::SubscribeFailed(error));
        }

        let entry = inner
            .links
            .get_mut(&link.token())
            .ok_or(TransportError::NotConnected)?;
        if !entry.is_live() {
            return Err(TransportError::ConnectionClosed);
        }

        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        entry.notifications = Some(tx);
        Ok(rx)
    }

    async fn write(&self, link: &LinkHandle, data: &[u8]) -> Result<(), TransportError> {
        let stalled = {
            let mut inner = self.inner.lock().unwrap();

            match inner.links.get(&link.token()) {
                None => return Err(TransportError::NotConnected),
                Some(entry) if !entry.is_live() => return Err(TransportError::ConnectionClosed),
                Some(_) => {}
            }

            if let Some(error) = inner.failing_writes.get(link.device_id()) {
                return Err(TransportError::SendFailed(error.clone()));
            }

            let stalled = inner.stalled_writes.contains(link.device_id());
            if !stalled {
                inner.written.push((link.device_id().clone(), data.to_vec()));
            }
            stalled
        };

        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn link_lost(&self, link: &LinkHandle) -> String {
        let lost = {
            let inner = self.inner.lock().unwrap();
            inner.links.get(&link.token()).map(|l| l.lost.subscribe())
        };
        let Some(mut lost) = lost else {
            return "unknown link".to_string();
        };

        let reason = lost
            .wait_for(Option::is_some)
            .await
            .map(|reason| reason.clone().unwrap_or_default());
        match reason {
            Ok(reason) => reason,
            // Links are never removed, so the sender outlives every receiver
            Err(_) => std::future::pending().await,
        }
    }

    async fn close(&self, link: &LinkHandle) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .links
            .get_mut(&link.token())
            .ok_or(TransportError::NotConnected)?;
        entry.closed = true;
        entry.notifications = None;
        inner.closed.push(link.device_id().clone());
        Ok(())
    }
}

//! Recording collaborators.
//!
//! Both mocks only record what the room asked of them, so tests can assert
//! on published local state, forwarded peer-connection descriptions and
//! sender updates.

use media_protocol::snapshot::LocalStateUpdate;
use room_signaling::collaborators::{PeerConnectionManager, SignalingTransport};
use serde_json::Value;
use std::sync::Mutex;

/// Signaling transport that records every published local state update.
#[derive(Debug, Default)]
pub struct MockSignalingTransport {
    published: Mutex<Vec<LocalStateUpdate>>,
}

impl MockSignalingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every update published so far, oldest first.
    #[must_use]
    pub fn published(&self) -> Vec<LocalStateUpdate> {
        self.published.lock().unwrap().clone()
    }

    #[must_use]
    pub fn publish_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    /// Most recent update.
    #[must_use]
    pub fn last(&self) -> Option<LocalStateUpdate> {
        self.published.lock().unwrap().last().cloned()
    }
}

impl SignalingTransport for MockSignalingTransport {
    fn publish(&self, update: LocalStateUpdate) {
        self.published.lock().unwrap().push(update);
    }
}

/// One call to [`PeerConnectionManager::update`].
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConnectionUpdate {
    pub peer_connections: Vec<Value>,
    pub synced: bool,
}

/// Peer-connection manager that records every call.
#[derive(Debug, Default)]
pub struct MockPeerConnectionManager {
    updates: Mutex<Vec<PeerConnectionUpdate>>,
    senders: Mutex<Vec<Vec<String>>>,
    closed: Mutex<bool>,
}

impl MockPeerConnectionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn updates(&self) -> Vec<PeerConnectionUpdate> {
        self.updates.lock().unwrap().clone()
    }

    /// Track ids from the most recent sender update.
    #[must_use]
    pub fn last_senders(&self) -> Option<Vec<String>> {
        self.senders.lock().unwrap().last().cloned()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

impl PeerConnectionManager for MockPeerConnectionManager {
    fn update(&self, peer_connections: &[Value], synced: bool) {
        self.updates.lock().unwrap().push(PeerConnectionUpdate {
            peer_connections: peer_connections.to_vec(),
            synced,
        });
    }

    fn set_track_senders(&self, track_ids: &[String]) {
        self.senders.lock().unwrap().push(track_ids.to_vec());
    }

    fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

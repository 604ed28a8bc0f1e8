//! Deferred receiver bindings.
//!
//! The room asks for a receiver by key before the peer-connection layer
//! has necessarily delivered it. Keys are receiver ids (v2 media, every data
//! receiver) or media-line ids (v3 media). A delivery with nobody waiting is
//! remembered, so a later wait for a receiver that is still open resolves
//! immediately.

use crate::receiver::TrackReceiver;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::oneshot;

/// Key a receiver is awaited under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReceiverKey {
    /// Transport receiver id (or data channel label).
    Id(String),
    /// Negotiated media-line id.
    Mid(String),
}

impl fmt::Display for ReceiverKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiverKey::Id(id) => write!(f, "id:{id}"),
            ReceiverKey::Mid(mid) => write!(f, "mid:{mid}"),
        }
    }
}

/// Arena of pending receiver slots, owned by the room actor.
#[derive(Debug, Default)]
pub struct PendingReceivers {
    waiting: HashMap<ReceiverKey, Vec<oneshot::Sender<TrackReceiver>>>,
    delivered: HashMap<ReceiverKey, TrackReceiver>,
}

impl PendingReceivers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the receiver with `key`.
    ///
    /// Resolves immediately if an open receiver was already delivered under
    /// that key.
    pub fn wait(&mut self, key: ReceiverKey) -> oneshot::Receiver<TrackReceiver> {
        let (tx, rx) = oneshot::channel();

        match self.delivered.get(&key) {
            Some(receiver) if !receiver.is_closed() => {
                // The receiver half is alive, so send cannot fail.
                let _ = tx.send(receiver.clone());
                return rx;
            }
            Some(_) => {
                self.delivered.remove(&key);
            }
            None => {}
        }

        let waiters = self.waiting.entry(key).or_default();
        waiters.retain(|waiter| !waiter.is_closed());
        waiters.push(tx);
        rx
    }

    /// Deliver `receiver` under `key`, resolving every current waiter.
    ///
    /// Returns the number of waiters resolved.
    pub fn resolve(&mut self, key: ReceiverKey, receiver: TrackReceiver) -> usize {
        let resolved = self
            .waiting
            .remove(&key)
            .map(|waiters| {
                waiters
                    .into_iter()
                    .filter_map(|waiter| waiter.send(receiver.clone()).ok())
                    .count()
            })
            .unwrap_or_default();
        self.delivered.insert(key, receiver);
        resolved
    }

    /// Whether an open receiver was delivered under `key`.
    #[must_use]
    pub fn is_delivered(&self, key: &ReceiverKey) -> bool {
        self.delivered
            .get(key)
            .is_some_and(|receiver| !receiver.is_closed())
    }

    /// Number of keys with live waiters.
    #[must_use]
    pub fn waiting_keys(&self) -> usize {
        self.waiting
            .values()
            .filter(|waiters| waiters.iter().any(|w| !w.is_closed()))
            .count()
    }

    /// Number of receivers remembered for later waits.
    #[must_use]
    pub fn remembered(&self) -> usize {
        self.delivered.len()
    }

    /// Drop remembered receivers that have since closed, and keys whose
    /// waiters have all gone away.
    pub fn prune_closed(&mut self) {
        self.delivered.retain(|_, receiver| !receiver.is_closed());
        self.waiting.retain(|_, waiters| {
            waiters.retain(|waiter| !waiter.is_closed());
            !waiters.is_empty()
        });
    }

    /// Drop every waiter and remembered receiver.
    pub fn clear(&mut self) {
        self.waiting.clear();
        self.delivered.clear();
    }
}

//! Transport-level receivers handed to the room by the peer-connection layer.
//!
//! A [`TrackReceiver`] is either a media receiver (identified by receiver id
//! and, once negotiated, its media-line id) or a data receiver wrapping a
//! [`DataTransport`]. Side-channels and data tracks both bind to data
//! receivers.

use bytes::Bytes;
use common::types::TrackKind;
use media_protocol::codec;
use media_protocol::message::OutboundMessage;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Client side of a data channel.
#[derive(Debug)]
pub struct DataTransport {
    outgoing: mpsc::UnboundedSender<Bytes>,
    incoming: mpsc::UnboundedReceiver<Bytes>,
}

/// Remote side of a data channel: what the client published, and a way to
/// deliver messages to the client.
#[derive(Debug)]
pub struct DataTransportPeer {
    /// Messages published by the client.
    pub published: mpsc::UnboundedReceiver<Bytes>,
    /// Deliver a message to the client.
    pub deliver: mpsc::UnboundedSender<Bytes>,
}

impl DataTransport {
    /// Create a connected transport pair.
    #[must_use]
    pub fn channel() -> (DataTransport, DataTransportPeer) {
        let (outgoing, published) = mpsc::unbounded_channel();
        let (deliver, incoming) = mpsc::unbounded_channel();
        (
            DataTransport { outgoing, incoming },
            DataTransportPeer { published, deliver },
        )
    }
}

/// Publishing half of a bound data transport.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    outgoing: mpsc::UnboundedSender<Bytes>,
}

impl ChannelSender {
    /// Encode and publish `message`. Returns whether it was handed to the
    /// transport.
    pub fn publish(&self, message: &OutboundMessage) -> bool {
        let bytes = match codec::encode_message(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    target: "room.signaling",
                    message_type = message.type_name(),
                    error = %e,
                    "Failed to encode side-channel message"
                );
                return false;
            }
        };

        if self.outgoing.send(bytes).is_err() {
            debug!(
                target: "room.signaling",
                message_type = message.type_name(),
                "Data transport closed, message dropped"
            );
            return false;
        }
        true
    }
}

#[derive(Debug)]
struct ReceiverInner {
    id: String,
    kind: TrackKind,
    mid: Option<String>,
    closed: CancellationToken,
    sender: Option<ChannelSender>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
}

/// A media or data receiver. Clones share the same underlying receiver.
#[derive(Debug, Clone)]
pub struct TrackReceiver {
    inner: Arc<ReceiverInner>,
}

impl TrackReceiver {
    /// Media receiver with its receiver id and negotiated media-line id.
    #[must_use]
    pub fn media(id: impl Into<String>, kind: TrackKind, mid: Option<String>) -> Self {
        Self {
            inner: Arc::new(ReceiverInner {
                id: id.into(),
                kind,
                mid,
                closed: CancellationToken::new(),
                sender: None,
                inbound: Mutex::new(None),
            }),
        }
    }

    /// Data receiver. `id` is the data channel label.
    #[must_use]
    pub fn data(id: impl Into<String>, transport: DataTransport) -> Self {
        let DataTransport { outgoing, incoming } = transport;
        Self {
            inner: Arc::new(ReceiverInner {
                id: id.into(),
                kind: TrackKind::Data,
                mid: None,
                closed: CancellationToken::new(),
                sender: Some(ChannelSender { outgoing }),
                inbound: Mutex::new(Some(incoming)),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    #[must_use]
    pub fn mid(&self) -> Option<&str> {
        self.inner.mid.as_deref()
    }

    /// Whether this receiver carries a data transport.
    #[must_use]
    pub fn is_data(&self) -> bool {
        self.inner.sender.is_some()
    }

    /// Signal that the underlying transport closed.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Token cancelled when the receiver closes.
    #[must_use]
    pub fn close_signal(&self) -> CancellationToken {
        self.inner.closed.clone()
    }

    /// Publishing half, for data receivers.
    #[must_use]
    pub fn sender(&self) -> Option<ChannelSender> {
        self.inner.sender.clone()
    }

    /// Inbound message stream, for data receivers. Can be taken once.
    #[must_use]
    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.inner
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Whether two handles refer to the same receiver.
    #[must_use]
    pub fn same_as(&self, other: &TrackReceiver) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::TrackSid;

    #[test]
    fn test_media_receiver_has_no_transport() {
        let receiver = TrackReceiver::media("recv-1", TrackKind::Video, Some("0".to_string()));
        assert!(!receiver.is_data());
        assert_eq!(receiver.mid(), Some("0"));
        assert!(receiver.sender().is_none());
        assert!(receiver.take_inbound().is_none());
    }

    #[tokio::test]
    async fn test_data_receiver_publishes_encoded_messages() {
        let (transport, mut peer) = DataTransport::channel();
        let receiver = TrackReceiver::data("label-1", transport);
        assert!(receiver.is_data());
        assert_eq!(receiver.kind(), TrackKind::Data);

        let sender = receiver.sender().unwrap();
        assert!(sender.publish(&OutboundMessage::ClientReset {
            track: TrackSid::new("MT1"),
            id: 1,
        }));

        let bytes = peer.published.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "client_reset");
    }

    #[tokio::test]
    async fn test_inbound_stream_taken_once() {
        let (transport, peer) = DataTransport::channel();
        let receiver = TrackReceiver::data("label-1", transport);

        let mut inbound = receiver.take_inbound().unwrap();
        assert!(receiver.clone().take_inbound().is_none());

        peer.deliver.send(Bytes::from_static(b"{}")).unwrap();
        assert_eq!(inbound.recv().await.unwrap(), Bytes::from_static(b"{}"));
    }

    #[test]
    fn test_close_is_shared_between_clones() {
        let receiver = TrackReceiver::media("recv-1", TrackKind::Audio, None);
        let clone = receiver.clone();
        clone.close();
        assert!(receiver.is_closed());
        assert!(receiver.close_signal().is_cancelled());
        assert!(receiver.same_as(&clone));
    }

    #[test]
    fn test_publish_after_peer_dropped() {
        let (transport, peer) = DataTransport::channel();
        let receiver = TrackReceiver::data("label-1", transport);
        drop(peer);
        let sent = receiver.sender().unwrap().publish(&OutboundMessage::ClientReset {
            track: TrackSid::new("MT1"),
            id: 1,
        });
        assert!(!sent);
    }
}

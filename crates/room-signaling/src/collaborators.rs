//! Interfaces to the layers around the room: the signaling transport, the
//! peer-connection manager and the local media senders.

use common::types::TrackSid;
use media_protocol::message::{EncodingHint, PublisherHintResult};
use media_protocol::snapshot::LocalStateUpdate;
use serde_json::Value;

/// Outbound half of the signaling transport.
///
/// Publishing is fire-and-forget; delivery and retries are the
/// transport's concern.
pub trait SignalingTransport: Send + Sync {
    /// Publish the local participant state.
    fn publish(&self, update: LocalStateUpdate);
}

/// The layer owning peer connections and transceivers.
pub trait PeerConnectionManager: Send + Sync {
    /// Apply the server's peer-connection descriptions.
    fn update(&self, peer_connections: &[Value], synced: bool);

    /// Local track ids that need senders.
    fn set_track_senders(&self, track_ids: &[String]);

    /// Close every peer connection.
    fn close(&self);
}

/// Applies publisher hints to local senders (enables mocking).
#[async_trait::async_trait]
pub trait PublisherHintApplier: Send + Sync {
    /// Apply `encodings` to the local track published as `track`.
    /// `None` resets the track to its default encodings.
    async fn apply_hint(
        &self,
        track: &TrackSid,
        encodings: Option<&[EncodingHint]>,
    ) -> PublisherHintResult;
}

/// Applier used when the room has no access to local senders.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisherHintApplier;

#[async_trait::async_trait]
impl PublisherHintApplier for NoopPublisherHintApplier {
    async fn apply_hint(
        &self,
        _track: &TrackSid,
        _encodings: Option<&[EncodingHint]>,
    ) -> PublisherHintResult {
        PublisherHintResult::CouldNotApplyHint
    }
}

//! `track_subscriptions` side-channel (protocol v3).
//!
//! Carries the server's view of which remote tracks this participant
//! receives, on which media line, and which subscriptions failed. The
//! revision survives channel re-setup so a replayed message is dropped.

use super::{ChannelName, MediaSignalingProtocol};
use crate::receiver::ChannelSender;
use media_protocol::message::{ChannelMessage, TrackSubscriptionsMessage};
use tracing::debug;

#[derive(Debug, Default)]
pub struct TrackSubscriptionsSignaling {
    revision: Option<u64>,
}

impl TrackSubscriptionsSignaling {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last applied revision.
    #[must_use]
    pub fn revision(&self) -> Option<u64> {
        self.revision
    }
}

impl MediaSignalingProtocol for TrackSubscriptionsSignaling {
    type Event = TrackSubscriptionsMessage;
    const CHANNEL: ChannelName = ChannelName::TrackSubscriptions;

    fn on_message(
        &mut self,
        message: ChannelMessage,
        _sender: &ChannelSender,
    ) -> Vec<TrackSubscriptionsMessage> {
        let message = match message {
            ChannelMessage::TrackSubscriptions(message) => message,
            other => {
                debug!(
                    target: "room.signaling.track_subscriptions",
                    message_type = other.type_name(),
                    "Ignoring message"
                );
                return Vec::new();
            }
        };

        if self.revision.is_some_and(|last| message.revision <= last) {
            debug!(
                target: "room.signaling.track_subscriptions",
                revision = message.revision,
                last = ?self.revision,
                "Dropping stale track subscriptions"
            );
            return Vec::new();
        }

        self.revision = Some(message.revision);
        vec![message]
    }
}

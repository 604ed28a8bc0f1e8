//! `track_priority` side-channel.
//!
//! Subscribe-side priorities are cached per track and replayed every time
//! the channel becomes ready. Publish-side priority is not supported by the
//! server.

use super::{ChannelName, MediaSignalingProtocol};
use crate::errors::RoomError;
use crate::receiver::ChannelSender;
use common::types::TrackSid;
use media_protocol::message::{ChannelMessage, OutboundMessage};
use media_protocol::snapshot::TrackPriority;
use std::collections::BTreeMap;
use std::convert::Infallible;
use tracing::debug;

/// Which side of a track a priority applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityDirection {
    Publish,
    Subscribe,
}

#[derive(Debug, Default)]
pub struct TrackPrioritySignaling {
    subscribe: BTreeMap<TrackSid, Option<TrackPriority>>,
}

impl TrackPrioritySignaling {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached subscribe priority. `Some(None)` means explicitly cleared.
    #[must_use]
    pub fn cached(&self, track: &TrackSid) -> Option<Option<TrackPriority>> {
        self.subscribe.get(track).copied()
    }

    /// Update the priority of `track` and tell the server if bound.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::Unsupported`] for [`PriorityDirection::Publish`].
    pub fn send_track_priority_update(
        &mut self,
        track: TrackSid,
        direction: PriorityDirection,
        priority: Option<TrackPriority>,
        sender: Option<&ChannelSender>,
    ) -> Result<(), RoomError> {
        if direction == PriorityDirection::Publish {
            return Err(RoomError::Unsupported(
                "publish priority updates are not supported".to_string(),
            ));
        }

        self.subscribe.insert(track.clone(), priority);
        if let Some(sender) = sender {
            sender.publish(&OutboundMessage::TrackPriority {
                track,
                subscribe: priority,
            });
        }
        Ok(())
    }
}

impl MediaSignalingProtocol for TrackPrioritySignaling {
    type Event = Infallible;
    const CHANNEL: ChannelName = ChannelName::TrackPriority;

    fn on_ready(&mut self, sender: &ChannelSender) {
        for (track, priority) in &self.subscribe {
            sender.publish(&OutboundMessage::TrackPriority {
                track: track.clone(),
                subscribe: *priority,
            });
        }
    }

    fn on_message(&mut self, message: ChannelMessage, _sender: &ChannelSender) -> Vec<Infallible> {
        debug!(
            target: "room.signaling.track_priority",
            message_type = message.type_name(),
            "Ignoring message"
        );
        Vec::new()
    }
}

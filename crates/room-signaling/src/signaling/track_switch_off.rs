//! `track_switch_off` side-channel.

use super::{ChannelName, MediaSignalingProtocol};
use crate::observability::metrics;
use crate::receiver::ChannelSender;
use common::types::TrackSid;
use media_protocol::message::ChannelMessage;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Switch states carried by one message. `true` means switched off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchOffUpdate {
    pub states: BTreeMap<TrackSid, bool>,
    /// Sids listed as both off and on; they end up on.
    pub conflicts: Vec<TrackSid>,
}

#[derive(Debug, Default)]
pub struct TrackSwitchOffSignaling;

impl TrackSwitchOffSignaling {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MediaSignalingProtocol for TrackSwitchOffSignaling {
    type Event = SwitchOffUpdate;
    const CHANNEL: ChannelName = ChannelName::TrackSwitchOff;

    fn on_message(&mut self, message: ChannelMessage, _sender: &ChannelSender) -> Vec<SwitchOffUpdate> {
        let message = match message {
            ChannelMessage::TrackSwitchOff(message) => message,
            other => {
                debug!(
                    target: "room.signaling.track_switch_off",
                    message_type = other.type_name(),
                    "Ignoring message"
                );
                return Vec::new();
            }
        };

        let mut update = SwitchOffUpdate::default();
        for sid in message.off {
            update.states.insert(sid, true);
        }
        for sid in message.on {
            if update.states.insert(sid.clone(), false) == Some(true) {
                warn!(
                    target: "room.signaling.track_switch_off",
                    track = %sid,
                    "Track listed as both switched off and on, treating as on"
                );
                metrics::record_switch_off_conflict();
                update.conflicts.push(sid);
            }
        }

        if update.states.is_empty() {
            return Vec::new();
        }
        vec![update]
    }
}

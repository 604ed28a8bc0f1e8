//! `publisher_hints` side-channel.
//!
//! The server asks the publisher to change simulcast encodings. Requests
//! are surfaced as events; the room applies them to the local senders and
//! answers with [`PublisherHintsSignaling::send_response`].

use super::{ChannelName, MediaSignalingProtocol};
use crate::receiver::ChannelSender;
use common::types::TrackSid;
use media_protocol::message::{ChannelMessage, OutboundMessage, PublisherHint, PublisherHintOutcome};
use tracing::{debug, warn};

/// A hint request received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherHintsRequested {
    pub id: u64,
    pub hints: Vec<PublisherHint>,
}

#[derive(Debug)]
pub struct PublisherHintsSignaling {
    next_reset_id: u64,
}

impl Default for PublisherHintsSignaling {
    fn default() -> Self {
        Self::new()
    }
}

impl PublisherHintsSignaling {
    #[must_use]
    pub fn new() -> Self {
        Self { next_reset_id: 1 }
    }

    /// Answer request `id` with one outcome per hint.
    pub fn send_response(&self, id: u64, outcomes: Vec<PublisherHintOutcome>, sender: &ChannelSender) {
        debug!(
            target: "room.signaling.publisher_hints",
            id,
            count = outcomes.len(),
            "Sending publisher hint results"
        );
        sender.publish(&OutboundMessage::PublisherHints { id, hints: outcomes });
    }

    /// Tell the server the sender of `track` was replaced so it can resend
    /// its hints. Returns the request id.
    pub fn send_track_replaced(&mut self, track: TrackSid, sender: &ChannelSender) -> u64 {
        let id = self.next_reset_id;
        self.next_reset_id += 1;
        sender.publish(&OutboundMessage::ClientReset { track, id });
        id
    }
}

impl MediaSignalingProtocol for PublisherHintsSignaling {
    type Event = PublisherHintsRequested;
    const CHANNEL: ChannelName = ChannelName::PublisherHints;

    fn on_message(
        &mut self,
        message: ChannelMessage,
        _sender: &ChannelSender,
    ) -> Vec<PublisherHintsRequested> {
        match message {
            ChannelMessage::PublisherHints(request) => match request.publisher {
                Some(publisher) => vec![PublisherHintsRequested {
                    id: publisher.id,
                    hints: publisher.hints,
                }],
                None => {
                    warn!(
                        target: "room.signaling.publisher_hints",
                        "Publisher hints request without a publisher section"
                    );
                    Vec::new()
                }
            },
            other => {
                debug!(
                    target: "room.signaling.publisher_hints",
                    message_type = other.type_name(),
                    "Ignoring message"
                );
                Vec::new()
            }
        }
    }
}

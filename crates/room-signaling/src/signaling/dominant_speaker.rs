//! `active_speaker` side-channel.

use super::{ChannelName, MediaSignalingProtocol};
use crate::receiver::ChannelSender;
use common::types::ParticipantSid;
use media_protocol::message::ChannelMessage;
use tracing::debug;

/// The loudest participant changed. `None` when nobody is speaking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DominantSpeakerChanged(pub Option<ParticipantSid>);

/// Tracks the dominant speaker announced by the server.
#[derive(Debug, Default)]
pub struct DominantSpeakerSignaling {
    loudest: Option<ParticipantSid>,
}

impl DominantSpeakerSignaling {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn loudest(&self) -> Option<&ParticipantSid> {
        self.loudest.as_ref()
    }
}

impl MediaSignalingProtocol for DominantSpeakerSignaling {
    type Event = DominantSpeakerChanged;
    const CHANNEL: ChannelName = ChannelName::ActiveSpeaker;

    fn on_message(&mut self, message: ChannelMessage, _sender: &ChannelSender) -> Vec<Self::Event> {
        let participant = match message {
            ChannelMessage::ActiveSpeaker { participant } => participant,
            other => {
                debug!(
                    target: "room.signaling.active_speaker",
                    message_type = other.type_name(),
                    "Ignoring message"
                );
                return Vec::new();
            }
        };

        if participant == self.loudest {
            return Vec::new();
        }
        self.loudest = participant.clone();
        vec![DominantSpeakerChanged(participant)]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::receiver::{DataTransport, TrackReceiver};

    fn sender() -> (ChannelSender, crate::receiver::DataTransportPeer) {
        let (transport, peer) = DataTransport::channel();
        (TrackReceiver::data("ds", transport).sender().unwrap(), peer)
    }

    fn speaker(sid: Option<&str>) -> ChannelMessage {
        ChannelMessage::ActiveSpeaker {
            participant: sid.map(ParticipantSid::new),
        }
    }

    #[test]
    fn test_emits_only_on_change() {
        let (sender, mut peer) = sender();
        let mut signaling = DominantSpeakerSignaling::new();

        assert_eq!(
            signaling.on_message(speaker(Some("PA1")), &sender),
            vec![DominantSpeakerChanged(Some(ParticipantSid::new("PA1")))]
        );
        assert!(signaling.on_message(speaker(Some("PA1")), &sender).is_empty());
        assert_eq!(signaling.loudest(), Some(&ParticipantSid::new("PA1")));

        assert_eq!(
            signaling.on_message(speaker(None), &sender),
            vec![DominantSpeakerChanged(None)]
        );
        assert!(signaling.loudest().is_none());

        // Never publishes.
        assert!(peer.published.try_recv().is_err());
    }

    #[test]
    fn test_ignores_other_messages() {
        let (sender, _peer) = sender();
        let mut signaling = DominantSpeakerSignaling::new();
        let message = ChannelMessage::TrackSwitchOff(Default::default());
        assert!(signaling.on_message(message, &sender).is_empty());
    }
}

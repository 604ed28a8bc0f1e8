//! `render_hints` side-channel.
//!
//! Hints are cached per track and sent in batches. At most one request is
//! in flight; changes made while waiting for the response are collected in
//! a dirty set and sent together once the response arrives.

use super::{ChannelName, MediaSignalingProtocol};
use crate::receiver::ChannelSender;
use common::types::TrackSid;
use media_protocol::message::{
    ChannelMessage, OutboundMessage, RenderDimensions, RenderHintsRequest, TrackRenderHint,
    HINT_RESULT_OK,
};
use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use tracing::{debug, warn};

/// How a subscriber renders one remote video track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderHint {
    pub enabled: Option<bool>,
    pub render_dimensions: Option<RenderDimensions>,
}

#[derive(Debug)]
pub struct RenderHintsSignaling {
    hints: BTreeMap<TrackSid, RenderHint>,
    dirty: BTreeSet<TrackSid>,
    pending: bool,
    next_id: u64,
}

impl Default for RenderHintsSignaling {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderHintsSignaling {
    #[must_use]
    pub fn new() -> Self {
        Self {
            hints: BTreeMap::new(),
            dirty: BTreeSet::new(),
            pending: false,
            next_id: 1,
        }
    }

    #[must_use]
    pub fn hint(&self, track: &TrackSid) -> Option<&RenderHint> {
        self.hints.get(track)
    }

    #[must_use]
    pub fn is_dirty(&self, track: &TrackSid) -> bool {
        self.dirty.contains(track)
    }

    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Whether a request is awaiting its response.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Cache `hint` for `track` and send if possible. A hint equal to the
    /// cached one is ignored.
    pub fn set_track_hint(&mut self, track: TrackSid, hint: RenderHint, sender: Option<&ChannelSender>) {
        if self.hints.get(&track) == Some(&hint) {
            return;
        }
        self.hints.insert(track.clone(), hint);
        self.dirty.insert(track);
        self.send_hints(sender);
    }

    /// Forget the hint for `track`.
    pub fn clear_track_hint(&mut self, track: &TrackSid) {
        self.hints.remove(track);
        self.dirty.remove(track);
    }

    /// Send every dirty hint in one request, if bound and nothing is in
    /// flight.
    pub fn send_hints(&mut self, sender: Option<&ChannelSender>) {
        let Some(sender) = sender else {
            return;
        };
        if self.pending || self.dirty.is_empty() {
            return;
        }

        let hints: Vec<TrackRenderHint> = std::mem::take(&mut self.dirty)
            .into_iter()
            .filter_map(|track| {
                let hint = self.hints.get(&track)?;
                Some(TrackRenderHint {
                    track,
                    enabled: hint.enabled,
                    render_dimensions: hint.render_dimensions,
                })
            })
            .collect();
        if hints.is_empty() {
            return;
        }

        let id = self.next_id;
        self.next_id += 1;
        debug!(
            target: "room.signaling.render_hints",
            id,
            count = hints.len(),
            "Sending render hints"
        );
        self.pending = sender.publish(&OutboundMessage::RenderHints {
            subscriber: RenderHintsRequest { id, hints },
        });
    }
}

impl MediaSignalingProtocol for RenderHintsSignaling {
    type Event = Infallible;
    const CHANNEL: ChannelName = ChannelName::RenderHints;

    fn on_ready(&mut self, sender: &ChannelSender) {
        self.pending = false;
        self.dirty = self.hints.keys().cloned().collect();
        self.send_hints(Some(sender));
    }

    fn on_message(&mut self, message: ChannelMessage, sender: &ChannelSender) -> Vec<Infallible> {
        let ChannelMessage::RenderHints(response) = message else {
            warn!(
                target: "room.signaling.render_hints",
                "Unexpected message on render hints channel"
            );
            return Vec::new();
        };

        if let Some(results) = response.subscriber {
            for result in results.hints {
                if result.result != HINT_RESULT_OK {
                    warn!(
                        target: "room.signaling.render_hints",
                        track = ?result.track,
                        result = %result.result,
                        "Server rejected render hint"
                    );
                }
            }
        }

        self.pending = false;
        self.send_hints(Some(sender));
        Vec::new()
    }

    fn on_teardown(&mut self) {
        self.pending = false;
    }
}

//! Subscription strategies.
//!
//! Protocol v2 learns which remote tracks are subscribed from the
//! `subscribed` section of every snapshot and binds them by receiver id.
//! Protocol v3 learns it from the `track_subscriptions` side-channel and
//! binds media by media-line id, data by channel label.
//!
//! Everything else about reconciliation is shared and lives in
//! [`RoomCore`](super::room::RoomCore).

use super::room::RoomCore;
use crate::config::ProtocolVersion;
use crate::pending::ReceiverKey;
use crate::receiver::TrackReceiver;
use crate::track::remote::{Binding, EnabledSource, SwitchOffState};
use common::error::ServerError;
use common::types::{ParticipantSid, TrackKind, TrackSid};
use media_protocol::message::{MediaTrackState, SwitchOffReason, TrackSubscriptionsMessage};
use media_protocol::snapshot::RoomSnapshot;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// How remote tracks get bound to receivers.
pub trait SubscriptionStrategy: Send {
    fn protocol(&self) -> ProtocolVersion;

    /// Key a delivered receiver resolves.
    fn receiver_key(&self, receiver: &TrackReceiver) -> ReceiverKey;

    fn enabled_source(&self) -> EnabledSource;

    /// Switch-off state of a new track nothing was cached for.
    fn default_switch_off(&self, track: &TrackSid, kind: TrackKind) -> SwitchOffState;

    /// Absorb the subscription section of a snapshot.
    fn apply_subscribed(&mut self, _snapshot: &RoomSnapshot) {}

    /// Bring receiver bindings in line with the known subscriptions.
    fn reconcile(&mut self, _core: &mut RoomCore) {}

    /// A remote track was added to the registry.
    fn track_created(&mut self, _core: &mut RoomCore, _participant: &ParticipantSid, _track: &TrackSid) {}

    /// A newer `track_subscriptions` message arrived.
    fn subscriptions_updated(&mut self, _core: &mut RoomCore, _message: TrackSubscriptionsMessage) {}
}

#[must_use]
pub fn strategy_for(protocol: ProtocolVersion) -> Box<dyn SubscriptionStrategy> {
    match protocol {
        ProtocolVersion::V2 => Box::new(V2Strategy::new()),
        ProtocolVersion::V3 => Box::new(V3Strategy::new()),
    }
}

// ----------------------------------------------------------------------------
// v2
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct V2Strategy {
    revision: Option<u64>,
    /// Track sid to receiver id.
    subscribed: HashMap<TrackSid, String>,
    /// Failures not yet applied to a known track.
    failures: HashMap<TrackSid, ServerError>,
}

impl V2Strategy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn receiver_id(&self, track: &TrackSid) -> Option<&str> {
        self.subscribed.get(track).map(String::as_str)
    }

    #[must_use]
    pub fn failure(&self, track: &TrackSid) -> Option<&ServerError> {
        self.failures.get(track)
    }
}

impl SubscriptionStrategy for V2Strategy {
    fn protocol(&self) -> ProtocolVersion {
        ProtocolVersion::V2
    }

    fn receiver_key(&self, receiver: &TrackReceiver) -> ReceiverKey {
        ReceiverKey::Id(receiver.id().to_string())
    }

    fn enabled_source(&self) -> EnabledSource {
        EnabledSource::Descriptor
    }

    fn default_switch_off(&self, _track: &TrackSid, _kind: TrackKind) -> SwitchOffState {
        SwitchOffState::on()
    }

    fn apply_subscribed(&mut self, snapshot: &RoomSnapshot) {
        let Some(subscribed) = &snapshot.subscribed else {
            return;
        };
        if self.revision.is_some_and(|last| subscribed.revision <= last) {
            debug!(
                target: "room.registry",
                revision = subscribed.revision,
                "Ignoring stale subscribed state"
            );
            return;
        }
        self.revision = Some(subscribed.revision);

        let mut ids = HashMap::new();
        for entry in &subscribed.tracks {
            if let Some(id) = &entry.id {
                self.failures.remove(&entry.sid);
                ids.insert(entry.sid.clone(), id.clone());
            } else if let Some(error) = &entry.error {
                self.failures
                    .entry(entry.sid.clone())
                    .or_insert_with(|| error.clone());
            }
        }
        self.subscribed = ids;

        let listed: BTreeSet<&TrackSid> = subscribed.tracks.iter().map(|entry| &entry.sid).collect();
        self.failures.retain(|sid, _| listed.contains(sid));
    }

    fn reconcile(&mut self, core: &mut RoomCore) {
        let events = &mut core.pending_events;
        let mut waits = Vec::new();

        for publication in core.registry.tracks_mut() {
            let sid = publication.sid().clone();
            if let Some(error) = self.failures.remove(&sid) {
                publication.subscription_failed(error, events);
            }
            if publication.is_failed() || publication.is_ended() {
                continue;
            }

            let Some(id) = self.subscribed.get(&sid) else {
                publication.detach(false, events);
                continue;
            };

            let key = ReceiverKey::Id(id.clone());
            let current = match publication.binding() {
                Binding::Attached(receiver) => receiver.id() == id,
                Binding::Pending(pending) => *pending == key,
                Binding::Detached => false,
            };
            if current {
                continue;
            }
            if publication.attached().is_some() {
                publication.detach(false, events);
            }
            waits.push((publication.participant().clone(), sid, key));
        }

        for (participant, track, key) in waits {
            core.await_receiver(participant, track, key);
        }
    }
}

// ----------------------------------------------------------------------------
// v3
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct V3Strategy {
    /// Media-line ids of switched-on tracks not yet in the registry.
    pending_mids: HashMap<TrackSid, String>,
    /// Data channel labels of tracks not yet in the registry.
    pending_labels: HashMap<TrackSid, String>,
    pending_errors: HashMap<TrackSid, ServerError>,
}

impl V3Strategy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pending_mid(&self, track: &TrackSid) -> Option<&str> {
        self.pending_mids.get(track).map(String::as_str)
    }

    #[must_use]
    pub fn pending_label(&self, track: &TrackSid) -> Option<&str> {
        self.pending_labels.get(track).map(String::as_str)
    }

    fn forget(&mut self, track: &TrackSid) {
        self.pending_mids.remove(track);
        self.pending_labels.remove(track);
        self.pending_errors.remove(track);
    }
}

impl SubscriptionStrategy for V3Strategy {
    fn protocol(&self) -> ProtocolVersion {
        ProtocolVersion::V3
    }

    fn receiver_key(&self, receiver: &TrackReceiver) -> ReceiverKey {
        match receiver.mid() {
            Some(mid) if !receiver.is_data() => ReceiverKey::Mid(mid.to_string()),
            _ => ReceiverKey::Id(receiver.id().to_string()),
        }
    }

    fn enabled_source(&self) -> EnabledSource {
        EnabledSource::SwitchOff
    }

    fn default_switch_off(&self, track: &TrackSid, kind: TrackKind) -> SwitchOffState {
        if kind.is_media() {
            warn!(
                target: "room.registry",
                track = %track,
                "No subscription state for new media track, assuming switched off"
            );
            SwitchOffState::off(Some(SwitchOffReason::DisabledBySubscriber))
        } else {
            SwitchOffState::on()
        }
    }

    fn track_created(&mut self, core: &mut RoomCore, participant: &ParticipantSid, track: &TrackSid) {
        if let Some(error) = self.pending_errors.remove(track) {
            self.forget(track);
            if let Some(publication) = core.registry.track_mut(track) {
                publication.subscription_failed(error, &mut core.pending_events);
            }
            return;
        }

        let key = match (self.pending_mids.remove(track), self.pending_labels.remove(track)) {
            (Some(mid), _) => ReceiverKey::Mid(mid),
            (None, Some(label)) => ReceiverKey::Id(label),
            (None, None) => return,
        };
        core.await_receiver(participant.clone(), track.clone(), key);
    }

    fn subscriptions_updated(&mut self, core: &mut RoomCore, message: TrackSubscriptionsMessage) {
        let mut listed = BTreeSet::new();
        let mut waits = Vec::new();

        for (sid, media) in message.media {
            listed.insert(sid.clone());
            let off = media.state == MediaTrackState::Off;
            let reason = if off { media.off_reason } else { None };

            let Some(publication) = core.registry.track_mut(&sid) else {
                if off {
                    self.pending_mids.remove(&sid);
                } else {
                    self.pending_mids.insert(sid.clone(), media.mid);
                }
                core.pending_switch_off
                    .insert(sid, SwitchOffState { off, reason });
                continue;
            };

            let key = ReceiverKey::Mid(media.mid.clone());
            let attached_elsewhere = publication
                .attached()
                .is_some_and(|receiver| receiver.mid() != Some(media.mid.as_str()));
            let pending_elsewhere = publication.pending_key().is_some_and(|pending| *pending != key);
            if off || attached_elsewhere || pending_elsewhere {
                publication.detach(true, &mut core.pending_events);
            }
            if !off && matches!(publication.binding(), Binding::Detached) {
                waits.push((publication.participant().clone(), sid.clone(), key));
            }
            publication.set_switched_off(off, reason, &mut core.pending_events);
        }

        for (sid, data) in message.data {
            listed.insert(sid.clone());
            let Some(publication) = core.registry.track_mut(&sid) else {
                self.pending_labels.insert(sid, data.label);
                continue;
            };
            let key = ReceiverKey::Id(data.label.clone());
            let current = match publication.binding() {
                Binding::Attached(receiver) => receiver.id() == data.label,
                Binding::Pending(pending) => *pending == key,
                Binding::Detached => false,
            };
            if !current {
                waits.push((publication.participant().clone(), sid, key));
            }
        }

        for (sid, error) in message.errors {
            listed.insert(sid.clone());
            match core.registry.track_mut(&sid) {
                Some(publication) => {
                    publication.subscription_failed(error, &mut core.pending_events);
                }
                None => {
                    self.pending_errors.insert(sid, error);
                }
            }
        }

        for publication in core.registry.tracks_mut() {
            if listed.contains(publication.sid()) {
                continue;
            }
            publication.detach(false, &mut core.pending_events);
        }

        // Each message is the full subscription set.
        self.pending_mids.retain(|sid, _| listed.contains(sid));
        self.pending_labels.retain(|sid, _| listed.contains(sid));
        self.pending_errors.retain(|sid, _| listed.contains(sid));
        core.pending_switch_off.retain(|sid, _| listed.contains(sid));

        for (participant, track, key) in waits {
            core.await_receiver(participant, track, key);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::receiver::DataTransport;
    use media_protocol::snapshot::{SubscribedState, SubscribedTrack};

    fn subscribed(revision: u64, tracks: Vec<SubscribedTrack>) -> RoomSnapshot {
        RoomSnapshot {
            subscribed: Some(SubscribedState { revision, tracks }),
            ..RoomSnapshot::default()
        }
    }

    fn entry(sid: &str, id: Option<&str>, error: Option<ServerError>) -> SubscribedTrack {
        SubscribedTrack {
            sid: TrackSid::new(sid),
            id: id.map(str::to_string),
            error,
        }
    }

    #[test]
    fn test_v2_keys_by_receiver_id() {
        let strategy = V2Strategy::new();
        let receiver = TrackReceiver::media("r1", TrackKind::Audio, Some("0".into()));
        assert_eq!(strategy.receiver_key(&receiver), ReceiverKey::Id("r1".into()));
    }

    #[test]
    fn test_v3_keys_media_by_mid() {
        let strategy = V3Strategy::new();
        let media = TrackReceiver::media("r1", TrackKind::Video, Some("3".into()));
        let (transport, _peer) = DataTransport::channel();
        let data = TrackReceiver::data("chat", transport);

        assert_eq!(strategy.receiver_key(&media), ReceiverKey::Mid("3".into()));
        assert_eq!(strategy.receiver_key(&data), ReceiverKey::Id("chat".into()));
    }

    #[test]
    fn test_v3_media_defaults_to_switched_off() {
        let strategy = V3Strategy::new();
        let sid = TrackSid::new("MT1");
        assert_eq!(
            strategy.default_switch_off(&sid, TrackKind::Video),
            SwitchOffState::off(Some(SwitchOffReason::DisabledBySubscriber))
        );
        assert_eq!(
            strategy.default_switch_off(&sid, TrackKind::Data),
            SwitchOffState::on()
        );
    }

    #[test]
    fn test_v2_subscribed_state_is_revision_gated() {
        let mut strategy = V2Strategy::new();
        strategy.apply_subscribed(&subscribed(2, vec![entry("MT1", Some("r1"), None)]));
        strategy.apply_subscribed(&subscribed(2, vec![]));
        assert_eq!(strategy.receiver_id(&TrackSid::new("MT1")), Some("r1"));

        strategy.apply_subscribed(&subscribed(3, vec![]));
        assert_eq!(strategy.receiver_id(&TrackSid::new("MT1")), None);
    }

    #[test]
    fn test_v2_first_failure_kept_until_subscribed() {
        let mut strategy = V2Strategy::new();
        let sid = TrackSid::new("MT1");
        strategy.apply_subscribed(&subscribed(
            1,
            vec![entry("MT1", None, Some(ServerError::new(1, "first")))],
        ));
        strategy.apply_subscribed(&subscribed(
            2,
            vec![entry("MT1", None, Some(ServerError::new(2, "second")))],
        ));
        assert_eq!(strategy.failure(&sid).unwrap().code, 1);

        strategy.apply_subscribed(&subscribed(3, vec![entry("MT1", Some("r1"), None)]));
        assert!(strategy.failure(&sid).is_none());
    }

    #[test]
    fn test_v2_failure_dropped_when_no_longer_listed() {
        let mut strategy = V2Strategy::new();
        let sid = TrackSid::new("MT9");
        strategy.apply_subscribed(&subscribed(
            1,
            vec![entry("MT9", None, Some(ServerError::new(53_204, "gone")))],
        ));
        assert!(strategy.failure(&sid).is_some());

        strategy.apply_subscribed(&subscribed(2, vec![entry("MT1", Some("r1"), None)]));
        assert!(strategy.failure(&sid).is_none());
    }
}

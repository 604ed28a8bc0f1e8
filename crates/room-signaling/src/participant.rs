//! Remote participants and the registry that reconciles them against
//! server snapshots.
//!
//! Every participant carries its own revision; a descriptor with a revision
//! at or below the applied one changes nothing. A disconnected participant
//! is remembered with its last revision and only comes back through a
//! descriptor with a higher revision.

use crate::actors::messages::{ParticipantInfo, RoomEvent};
use crate::track::remote::RemoteTrackPublication;
use common::types::{ParticipantSid, TrackSid};
use media_protocol::snapshot::{ParticipantDescriptor, ParticipantState, RemoteTrackDescriptor};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Builds the publication for a newly described remote track.
pub type TrackFactory<'a> =
    dyn FnMut(&ParticipantSid, &RemoteTrackDescriptor) -> RemoteTrackPublication + 'a;

/// Outcome of applying one descriptor to a participant.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParticipantUpdate {
    /// Whether the descriptor was newer than the applied revision.
    pub applied: bool,
    pub added: Vec<TrackSid>,
    pub removed: Vec<TrackSid>,
    /// The descriptor reported the participant as disconnected.
    pub disconnected: bool,
}

#[derive(Debug)]
pub struct RemoteParticipant {
    sid: ParticipantSid,
    identity: String,
    revision: Option<u64>,
    state: ParticipantState,
    tracks: BTreeMap<TrackSid, RemoteTrackPublication>,
    network_quality_level: Option<u8>,
}

impl RemoteParticipant {
    pub fn new(sid: ParticipantSid, identity: String) -> Self {
        Self {
            sid,
            identity,
            revision: None,
            state: ParticipantState::Connected,
            tracks: BTreeMap::new(),
            network_quality_level: None,
        }
    }

    pub fn sid(&self) -> &ParticipantSid {
        &self.sid
    }

    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    pub fn state(&self) -> &ParticipantState {
        &self.state
    }

    pub fn track(&self, sid: &TrackSid) -> Option<&RemoteTrackPublication> {
        self.tracks.get(sid)
    }

    pub fn track_mut(&mut self, sid: &TrackSid) -> Option<&mut RemoteTrackPublication> {
        self.tracks.get_mut(sid)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &RemoteTrackPublication> {
        self.tracks.values()
    }

    pub fn tracks_mut(&mut self) -> impl Iterator<Item = &mut RemoteTrackPublication> {
        self.tracks.values_mut()
    }

    pub fn set_network_quality_level(&mut self, level: Option<u8>) {
        self.network_quality_level = level;
    }

    /// Apply a descriptor. Tracks missing from the descriptor are removed,
    /// new ones are built by `new_track`.
    pub fn update(
        &mut self,
        descriptor: &ParticipantDescriptor,
        new_track: &mut TrackFactory<'_>,
        events: &mut Vec<RoomEvent>,
    ) -> ParticipantUpdate {
        let mut update = ParticipantUpdate::default();
        if self.revision.is_some_and(|last| descriptor.revision <= last) {
            debug!(
                target: "room.registry",
                participant = %self.sid,
                revision = descriptor.revision,
                "Ignoring stale participant descriptor"
            );
            return update;
        }
        self.revision = Some(descriptor.revision);
        update.applied = true;

        let mut described = BTreeSet::new();
        for track in &descriptor.tracks {
            described.insert(track.sid.clone());
            match self.tracks.get_mut(&track.sid) {
                Some(publication) => publication.update(track, events),
                None => {
                    let publication = new_track(&self.sid, track);
                    events.push(RoomEvent::TrackAdded {
                        participant: self.sid.clone(),
                        track: track.sid.clone(),
                        kind: track.kind,
                        name: track.name.clone(),
                        enabled: publication.is_enabled(),
                        switched_off: publication.switch_off().off,
                    });
                    self.tracks.insert(track.sid.clone(), publication);
                    update.added.push(track.sid.clone());
                }
            }
        }

        let gone: Vec<TrackSid> = self
            .tracks
            .keys()
            .filter(|sid| !described.contains(*sid))
            .cloned()
            .collect();
        for sid in gone {
            if let Some(mut publication) = self.tracks.remove(&sid) {
                publication.remove(events);
                update.removed.push(sid);
            }
        }

        match &descriptor.state {
            Some(ParticipantState::Disconnected) => update.disconnected = true,
            Some(state) if *state != self.state => {
                self.state = state.clone();
                events.push(RoomEvent::ParticipantStateChanged {
                    participant: self.sid.clone(),
                    state: state.clone(),
                });
            }
            _ => {}
        }

        update
    }

    /// Remove every track and mark the participant disconnected. Returns the
    /// sids of the removed tracks.
    pub fn disconnect(&mut self, events: &mut Vec<RoomEvent>) -> Vec<TrackSid> {
        let tracks = std::mem::take(&mut self.tracks);
        let mut removed = Vec::with_capacity(tracks.len());
        for (sid, mut publication) in tracks {
            publication.remove(events);
            removed.push(sid);
        }
        self.state = ParticipantState::Disconnected;
        events.push(RoomEvent::ParticipantDisconnected {
            participant: self.sid.clone(),
        });
        removed
    }

    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            sid: self.sid.clone(),
            identity: self.identity.clone(),
            revision: self.revision.unwrap_or_default(),
            state: self.state.clone(),
            network_quality_level: self.network_quality_level,
            tracks: self.tracks.values().map(RemoteTrackPublication::info).collect(),
        }
    }
}

/// Track changes produced by one reconciliation pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RegistryChanges {
    pub added: Vec<(ParticipantSid, TrackSid)>,
    pub removed: Vec<TrackSid>,
}

/// Live remote participants plus the revisions of the disconnected ones.
#[derive(Debug, Default)]
pub struct Registry {
    participants: BTreeMap<ParticipantSid, RemoteParticipant>,
    disconnected: HashMap<ParticipantSid, u64>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn get(&self, sid: &ParticipantSid) -> Option<&RemoteParticipant> {
        self.participants.get(sid)
    }

    pub fn get_mut(&mut self, sid: &ParticipantSid) -> Option<&mut RemoteParticipant> {
        self.participants.get_mut(sid)
    }

    pub fn participants(&self) -> impl Iterator<Item = &RemoteParticipant> {
        self.participants.values()
    }

    /// Every remote publication.
    pub fn tracks_mut(&mut self) -> impl Iterator<Item = &mut RemoteTrackPublication> {
        self.participants
            .values_mut()
            .flat_map(RemoteParticipant::tracks_mut)
    }

    pub fn track(&self, sid: &TrackSid) -> Option<&RemoteTrackPublication> {
        self.participants.values().find_map(|p| p.track(sid))
    }

    pub fn track_mut(&mut self, sid: &TrackSid) -> Option<&mut RemoteTrackPublication> {
        self.participants.values_mut().find_map(|p| p.track_mut(sid))
    }

    /// Revision remembered for a disconnected participant.
    pub fn disconnected_revision(&self, sid: &ParticipantSid) -> Option<u64> {
        self.disconnected.get(sid).copied()
    }

    /// Reconcile the participant list of a snapshot.
    ///
    /// The local participant is skipped. When `synced` is set every
    /// participant missing from `descriptors` is disconnected.
    pub fn apply(
        &mut self,
        descriptors: &[ParticipantDescriptor],
        local: Option<&ParticipantSid>,
        synced: bool,
        new_track: &mut TrackFactory<'_>,
        events: &mut Vec<RoomEvent>,
    ) -> RegistryChanges {
        let mut changes = RegistryChanges::default();
        let mut kept = BTreeSet::new();

        for descriptor in descriptors {
            if Some(&descriptor.sid) == local {
                continue;
            }
            if let Some(last) = self.disconnected.get(&descriptor.sid) {
                if *last >= descriptor.revision {
                    debug!(
                        target: "room.registry",
                        participant = %descriptor.sid,
                        revision = descriptor.revision,
                        "Ignoring descriptor of disconnected participant"
                    );
                    continue;
                }
                self.disconnected.remove(&descriptor.sid);
            }

            kept.insert(descriptor.sid.clone());
            let participant = self
                .participants
                .entry(descriptor.sid.clone())
                .or_insert_with(|| {
                    info!(
                        target: "room.registry",
                        participant = %descriptor.sid,
                        "Participant connected"
                    );
                    events.push(RoomEvent::ParticipantConnected {
                        participant: descriptor.sid.clone(),
                        identity: descriptor.identity.clone(),
                    });
                    RemoteParticipant::new(descriptor.sid.clone(), descriptor.identity.clone())
                });

            let update = participant.update(descriptor, new_track, events);
            changes.added.extend(
                update
                    .added
                    .into_iter()
                    .map(|track| (descriptor.sid.clone(), track)),
            );
            changes.removed.extend(update.removed);
            if update.disconnected {
                kept.remove(&descriptor.sid);
                changes.removed.extend(self.disconnect(&descriptor.sid, events));
            }
        }

        if synced {
            let stale: Vec<ParticipantSid> = self
                .participants
                .keys()
                .filter(|sid| !kept.contains(*sid))
                .cloned()
                .collect();
            for sid in stale {
                changes.removed.extend(self.disconnect(&sid, events));
            }
        }

        changes
    }

    /// Disconnect a participant and remember its revision. Returns the sids
    /// of its removed tracks.
    pub fn disconnect(&mut self, sid: &ParticipantSid, events: &mut Vec<RoomEvent>) -> Vec<TrackSid> {
        let Some(mut participant) = self.participants.remove(sid) else {
            return Vec::new();
        };
        info!(target: "room.registry", participant = %sid, "Participant disconnected");
        let removed = participant.disconnect(events);
        self.disconnected
            .insert(sid.clone(), participant.revision.unwrap_or_default());
        removed
    }

    /// Disconnect every participant.
    pub fn disconnect_all(&mut self, events: &mut Vec<RoomEvent>) -> Vec<TrackSid> {
        let sids: Vec<ParticipantSid> = self.participants.keys().cloned().collect();
        sids.iter()
            .flat_map(|sid| self.disconnect(sid, events))
            .collect()
    }

    pub fn info(&self) -> Vec<ParticipantInfo> {
        self.participants.values().map(RemoteParticipant::info).collect()
    }
}

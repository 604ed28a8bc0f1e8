//! Local participant and its track publications.
//!
//! Every local mutation bumps the participant revision once and marks the
//! state dirty. The room flushes dirty state at most once per mailbox
//! drain through [`LocalParticipant::take_update`].

use super::lifecycle::TrackLifecycle;
use crate::actors::messages::{LocalParticipantInfo, LocalTrackInfo, RoomEvent};
use crate::errors::RoomError;
use common::error::ServerError;
use common::types::{ParticipantSid, TrackKind, TrackSid};
use media_protocol::snapshot::{
    LocalParticipantState, LocalStateUpdate, LocalTrackState, PublicationState, PublishedState,
    PublishedTrack, RecordingMediaState, TrackPriority,
};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Warning raised when the recording of a published track lost its media.
pub const WARNING_RECORDING_MEDIA_LOST: &str = "recording-media-lost";

/// A local track to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLocalTrack {
    pub id: String,
    pub kind: TrackKind,
    pub name: String,
    pub enabled: bool,
    pub priority: TrackPriority,
}

impl NewLocalTrack {
    /// Enabled track at standard priority.
    pub fn new(id: impl Into<String>, kind: TrackKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            enabled: true,
            priority: TrackPriority::Standard,
        }
    }
}

#[derive(Debug)]
pub struct LocalTrackPublication {
    id: String,
    kind: TrackKind,
    name: String,
    priority: TrackPriority,
    lifecycle: TrackLifecycle,
    sid: Option<TrackSid>,
    error: Option<ServerError>,
    recordings: Option<RecordingMediaState>,
}

impl LocalTrackPublication {
    fn new(track: NewLocalTrack) -> Self {
        Self {
            id: track.id,
            kind: track.kind,
            name: track.name,
            priority: track.priority,
            lifecycle: TrackLifecycle::new(track.enabled),
            sid: None,
            error: None,
            recordings: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Server-assigned sid, once published.
    pub fn sid(&self) -> Option<&TrackSid> {
        self.sid.as_ref()
    }

    pub fn error(&self) -> Option<&ServerError> {
        self.error.as_ref()
    }

    fn fail(&mut self, error: ServerError, events: &mut Vec<RoomEvent>) {
        self.lifecycle.end();
        self.error = Some(error.clone());
        events.push(RoomEvent::LocalTrackPublishFailed {
            id: self.id.clone(),
            error,
        });
    }

    fn apply(&mut self, published: &PublishedTrack, events: &mut Vec<RoomEvent>) {
        match &published.state {
            Some(PublicationState::Ready) => {
                if let Some(sid) = published.sid.as_ref().filter(|_| self.sid.is_none()) {
                    info!(
                        target: "room.registry",
                        id = %self.id,
                        track = %sid,
                        "Local track published"
                    );
                    self.sid = Some(sid.clone());
                    events.push(RoomEvent::LocalTrackPublished {
                        id: self.id.clone(),
                        track: sid.clone(),
                    });
                }
            }
            Some(PublicationState::Failed) if self.error.is_none() => {
                let error = published
                    .error
                    .clone()
                    .unwrap_or_else(|| ServerError::new(0, "Track publication failed"));
                warn!(
                    target: "room.registry",
                    id = %self.id,
                    code = error.code,
                    "Local track publication failed"
                );
                self.fail(error, events);
            }
            _ => {}
        }

        let recordings = published
            .media_states
            .as_ref()
            .and_then(|states| states.recordings.clone());
        if let Some(recordings) = recordings {
            if self.recordings.as_ref() == Some(&recordings) {
                return;
            }
            match &recordings {
                RecordingMediaState::NoMedia => events.push(RoomEvent::LocalTrackWarning {
                    id: self.id.clone(),
                    warning: WARNING_RECORDING_MEDIA_LOST.to_string(),
                }),
                RecordingMediaState::Ok => events.push(RoomEvent::LocalTrackWarningsCleared {
                    id: self.id.clone(),
                }),
                RecordingMediaState::Other(value) => warn!(
                    target: "room.registry",
                    id = %self.id,
                    state = %value,
                    "Unknown recording media state"
                ),
            }
            self.recordings = Some(recordings);
        }
    }

    fn state(&self) -> LocalTrackState {
        LocalTrackState {
            enabled: self.lifecycle.is_enabled(),
            id: self.id.clone(),
            kind: self.kind,
            name: self.name.clone(),
            priority: self.priority,
        }
    }

    fn info(&self) -> LocalTrackInfo {
        LocalTrackInfo {
            id: self.id.clone(),
            sid: self.sid.clone(),
            kind: self.kind,
            name: self.name.clone(),
            priority: self.priority,
            state: self.lifecycle.state(),
            error: self.error.clone(),
        }
    }
}

#[derive(Debug)]
pub struct LocalParticipant {
    sid: Option<ParticipantSid>,
    identity: Option<String>,
    revision: u64,
    published_revision: Option<u64>,
    tracks: Vec<LocalTrackPublication>,
    bandwidth_profile: Option<Value>,
    bandwidth_profile_revision: u64,
    sent_bandwidth_profile_revision: u64,
    dirty: bool,
}

impl Default for LocalParticipant {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalParticipant {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sid: None,
            identity: None,
            revision: 1,
            published_revision: None,
            tracks: Vec::new(),
            bandwidth_profile: None,
            bandwidth_profile_revision: 0,
            sent_bandwidth_profile_revision: 0,
            dirty: false,
        }
    }

    pub fn sid(&self) -> Option<&ParticipantSid> {
        self.sid.as_ref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.dirty = true;
    }

    fn track_mut(&mut self, id: &str) -> Result<&mut LocalTrackPublication, RoomError> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| RoomError::TrackNotFound(id.to_string()))
    }

    /// Start publishing `track`. A track with a known id is left alone.
    pub fn add_track(&mut self, track: NewLocalTrack) -> bool {
        if self.tracks.iter().any(|t| t.id == track.id) {
            debug!(target: "room.registry", id = %track.id, "Local track already added");
            return false;
        }
        self.tracks.push(LocalTrackPublication::new(track));
        self.touch();
        true
    }

    /// Stop publishing the track with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::TrackNotFound`] if no such track exists.
    pub fn remove_track(&mut self, id: &str) -> Result<(), RoomError> {
        let before = self.tracks.len();
        self.tracks.retain(|t| t.id != id);
        if self.tracks.len() == before {
            return Err(RoomError::TrackNotFound(id.to_string()));
        }
        self.touch();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`RoomError::TrackNotFound`] if no such track exists.
    pub fn set_track_enabled(&mut self, id: &str, enabled: bool) -> Result<(), RoomError> {
        if self.track_mut(id)?.lifecycle.enable(enabled).is_some() {
            self.touch();
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`RoomError::TrackNotFound`] if no such track exists.
    pub fn set_track_priority(&mut self, id: &str, priority: TrackPriority) -> Result<(), RoomError> {
        let track = self.track_mut(id)?;
        if track.priority != priority {
            track.priority = priority;
            self.touch();
        }
        Ok(())
    }

    pub fn set_bandwidth_profile(&mut self, profile: Value) {
        self.bandwidth_profile = Some(profile);
        self.bandwidth_profile_revision += 1;
        self.touch();
    }

    fn participant_state(&self) -> LocalParticipantState {
        LocalParticipantState {
            revision: self.revision,
            tracks: self.tracks.iter().map(LocalTrackPublication::state).collect(),
        }
    }

    /// State to publish, if anything changed since the last call. The
    /// bandwidth profile is attached only when it changed since it was last
    /// sent.
    pub fn take_update(&mut self) -> Option<LocalStateUpdate> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;

        let bandwidth_profile = if self.bandwidth_profile_revision > self.sent_bandwidth_profile_revision {
            self.sent_bandwidth_profile_revision = self.bandwidth_profile_revision;
            self.bandwidth_profile.clone()
        } else {
            None
        };

        Some(LocalStateUpdate {
            participant: self.participant_state(),
            bandwidth_profile,
            peer_connections: None,
        })
    }

    /// Current state together with peer-connection state.
    pub fn peer_connection_update(&self, state: Value) -> LocalStateUpdate {
        LocalStateUpdate {
            participant: self.participant_state(),
            bandwidth_profile: None,
            peer_connections: Some(vec![state]),
        }
    }

    /// Ids of tracks that still need senders.
    pub fn track_ids(&self) -> Vec<String> {
        self.tracks
            .iter()
            .filter(|t| !t.lifecycle.is_ended())
            .map(|t| t.id.clone())
            .collect()
    }

    /// Local track published under `sid`.
    pub fn find_by_sid(&self, sid: &TrackSid) -> Option<&LocalTrackPublication> {
        self.tracks.iter().find(|t| t.sid.as_ref() == Some(sid))
    }

    /// Apply the server's view of our publications.
    pub fn update_published(&mut self, published: &PublishedState, events: &mut Vec<RoomEvent>) {
        if self.published_revision.is_some_and(|last| published.revision <= last) {
            debug!(
                target: "room.registry",
                revision = published.revision,
                "Ignoring stale published state"
            );
            return;
        }
        self.published_revision = Some(published.revision);

        for entry in &published.tracks {
            match self.tracks.iter_mut().find(|t| t.id == entry.id) {
                Some(track) => track.apply(entry, events),
                None => debug!(
                    target: "room.registry",
                    id = %entry.id,
                    "Published state for unknown local track"
                ),
            }
        }
    }

    /// Adopt the server-assigned identity. Only the first call has an
    /// effect.
    pub fn connect(&mut self, sid: ParticipantSid, identity: String, events: &mut Vec<RoomEvent>) {
        if self.sid.is_some() {
            return;
        }
        info!(target: "room.registry", participant = %sid, "Local participant connected");
        self.sid = Some(sid.clone());
        self.identity = Some(identity.clone());
        events.push(RoomEvent::LocalParticipantConnected {
            participant: sid,
            identity,
        });
    }

    /// Fail every track that has not already failed.
    pub fn disconnect(&mut self, events: &mut Vec<RoomEvent>) {
        for track in &mut self.tracks {
            if track.error.is_none() {
                track.fail(ServerError::participant_disconnected(), events);
            }
        }
    }

    pub fn info(&self, network_quality_level: Option<u8>) -> LocalParticipantInfo {
        LocalParticipantInfo {
            sid: self.sid.clone(),
            identity: self.identity.clone(),
            revision: self.revision,
            network_quality_level,
            tracks: self.tracks.iter().map(LocalTrackPublication::info).collect(),
        }
    }
}

//! Room state snapshots (inbound) and local participant state (outbound).

use common::error::ServerError;
use common::types::{ParticipantSid, TrackKind, TrackSid};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Snapshot `type` marking a full (synced) snapshot.
pub const SNAPSHOT_TYPE_SYNCED: &str = "synced";

/// Transport descriptor `type` for side-channels carried over a data channel.
pub const TRANSPORT_TYPE_DATA_CHANNEL: &str = "data-channel";

/// Server-pushed room state.
///
/// A snapshot is either full (`type == "synced"`) or partial; every
/// section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// `"synced"` for full snapshots, anything else for partial ones
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// The local participant's own server identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<LocalParticipantDescriptor>,

    #[serde(default)]
    pub participants: Vec<ParticipantDescriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<PublishedState>,

    /// Protocol v2 only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribed: Option<SubscribedState>,

    /// Opaque peer-connection descriptions forwarded to the transport layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_connections: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording: Option<RecordingState>,

    /// Side-channel name to transport descriptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_signaling: Option<HashMap<String, MediaSignalingDescriptor>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Value>,
}

impl RoomSnapshot {
    /// Whether this is a full snapshot
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.kind.as_deref() == Some(SNAPSHOT_TYPE_SYNCED)
    }

    /// Data-channel label advertised for the named side-channel, if any
    #[must_use]
    pub fn data_channel_label(&self, channel: &str) -> Option<&str> {
        self.media_signaling
            .as_ref()?
            .get(channel)?
            .data_channel_label()
    }
}

/// Identity the server assigned to the local participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalParticipantDescriptor {
    pub sid: ParticipantSid,
    #[serde(default)]
    pub identity: String,
}

open_enum! {
    /// Connection state of a remote participant
    pub enum ParticipantState {
        /// Participant is connected
        Connected => "connected",
        /// Participant lost signaling and is trying to recover
        Reconnecting => "reconnecting",
        /// Participant left
        Disconnected => "disconnected",
    }
}

/// Remote participant as described by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantDescriptor {
    pub sid: ParticipantSid,
    #[serde(default)]
    pub identity: String,
    pub revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ParticipantState>,
    #[serde(default)]
    pub tracks: Vec<RemoteTrackDescriptor>,
}

/// Priority of a published or subscribed track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackPriority {
    Low,
    #[default]
    Standard,
    High,
}

/// Track published by a remote participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTrackDescriptor {
    pub sid: TrackSid,
    #[serde(default)]
    pub name: String,
    pub kind: TrackKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TrackPriority>,
}

fn default_enabled() -> bool {
    true
}

/// Server view of the local participant's publications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedState {
    pub revision: u64,
    #[serde(default)]
    pub tracks: Vec<PublishedTrack>,
}

open_enum! {
    /// Publication state of a local track
    pub enum PublicationState {
        /// Server has seen the track but not finished publishing it
        Created => "created",
        /// Track is published and has a sid
        Ready => "ready",
        /// Server refused the publication
        Failed => "failed",
    }
}

open_enum! {
    /// Health of the recording of a published track
    pub enum RecordingMediaState {
        /// Media is being recorded
        Ok => "OK",
        /// Recording lost the media
        NoMedia => "NO_MEDIA",
    }
}

/// Media states reported for a published track.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MediaStates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recordings: Option<RecordingMediaState>,
}

/// One local track as seen by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedTrack {
    /// Local track id
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<TrackSid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PublicationState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServerError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_states: Option<MediaStates>,
}

/// Protocol v2 subscription list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribedState {
    pub revision: u64,
    #[serde(default)]
    pub tracks: Vec<SubscribedTrack>,
}

/// A track the local participant is (or failed to be) subscribed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribedTrack {
    pub sid: TrackSid,
    /// Transport-level receiver id, present once subscribed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServerError>,
}

/// Room recording state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingState {
    pub revision: u64,
    pub is_recording: bool,
}

/// Where a side-channel is carried.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MediaSignalingDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportDescriptor>,
}

impl MediaSignalingDescriptor {
    /// Label of the data channel carrying this side-channel, if it is
    /// carried over one
    #[must_use]
    pub fn data_channel_label(&self) -> Option<&str> {
        let transport = self.transport.as_ref()?;
        if transport.kind == TRANSPORT_TYPE_DATA_CHANNEL {
            transport.label.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Outbound local participant state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalStateUpdate {
    pub participant: LocalParticipantState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_profile: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_connections: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalParticipantState {
    pub revision: u64,
    pub tracks: Vec<LocalTrackState>,
}

/// One local track as published to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalTrackState {
    pub enabled: bool,
    pub id: String,
    pub kind: TrackKind,
    pub name: String,
    pub priority: TrackPriority,
}

//! Message types for the room actor.
//!
//! Requests use `tokio::sync::mpsc` into the actor with `tokio::sync::oneshot`
//! for replies. Facts flow out on a `tokio::sync::broadcast` bus as
//! [`RoomEvent`]s.

use crate::errors::RoomError;
use crate::receiver::TrackReceiver;
use crate::signaling::render_hints::RenderHint;
use crate::signaling::track_priority::PriorityDirection;
use crate::signaling::ChannelName;
use crate::track::lifecycle::TrackState;
use crate::track::local::NewLocalTrack;
use common::error::ServerError;
use common::types::{ParticipantSid, TrackKind, TrackSid};
use media_protocol::message::{NetworkQualityLevels, PublisherHint, SwitchOffReason};
use media_protocol::snapshot::{ParticipantState, RoomSnapshot, TrackPriority};
use serde_json::Value;
use tokio::sync::oneshot;

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Apply a snapshot received on the signaling transport.
    ReceiveSnapshot { snapshot: Box<RoomSnapshot> },

    /// The peer-connection layer delivered a receiver.
    AddTrackReceiver { receiver: TrackReceiver },

    /// Publish a new local track.
    AddLocalTrack {
        track: NewLocalTrack,
        /// Response channel for confirmation.
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Stop publishing a local track.
    RemoveLocalTrack {
        id: String,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    SetLocalTrackEnabled {
        id: String,
        enabled: bool,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    SetLocalTrackPriority {
        id: String,
        priority: TrackPriority,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Replace the bandwidth profile sent with the next local state.
    SetBandwidthProfile { profile: Value },

    /// Publish peer-connection state immediately.
    PublishPeerConnectionState { state: Value },

    /// Send a track priority update on the `track_priority` channel.
    SetTrackPriority {
        track: TrackSid,
        direction: PriorityDirection,
        priority: Option<TrackPriority>,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    SetRenderHint { track: TrackSid, hint: RenderHint },

    ClearRenderHint { track: TrackSid },

    /// Tell the server a published track's sender was replaced.
    SendTrackReplaced {
        track: TrackSid,
        /// Response channel for the request id, or an error when the
        /// publisher hints channel is not ready.
        respond_to: oneshot::Sender<Result<u64, RoomError>>,
    },

    /// Get current room state (for debugging/tests).
    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },

    /// Tear the room down.
    Disconnect {
        error: Option<ServerError>,
        respond_to: oneshot::Sender<()>,
    },
}

/// Whose network quality changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkQualitySubject {
    Local,
    Remote(ParticipantSid),
}

/// Facts published by the room.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    ParticipantConnected {
        participant: ParticipantSid,
        identity: String,
    },
    ParticipantStateChanged {
        participant: ParticipantSid,
        state: ParticipantState,
    },
    ParticipantDisconnected {
        participant: ParticipantSid,
    },
    TrackAdded {
        participant: ParticipantSid,
        track: TrackSid,
        kind: TrackKind,
        name: String,
        enabled: bool,
        switched_off: bool,
    },
    TrackRemoved {
        participant: ParticipantSid,
        track: TrackSid,
    },
    TrackStateChanged {
        participant: ParticipantSid,
        track: TrackSid,
        state: TrackState,
    },
    TrackPriorityChanged {
        participant: ParticipantSid,
        track: TrackSid,
        priority: TrackPriority,
    },
    TrackSubscribed {
        participant: ParticipantSid,
        track: TrackSid,
        receiver_id: String,
    },
    TrackUnsubscribed {
        participant: ParticipantSid,
        track: TrackSid,
    },
    TrackSubscriptionFailed {
        participant: ParticipantSid,
        track: TrackSid,
        error: ServerError,
    },
    TrackSwitchedOff {
        participant: ParticipantSid,
        track: TrackSid,
        switched_off: bool,
        reason: Option<SwitchOffReason>,
    },
    DominantSpeakerChanged {
        participant: Option<ParticipantSid>,
    },
    NetworkQualityLevelChanged {
        subject: NetworkQualitySubject,
        level: Option<u8>,
        levels: Option<NetworkQualityLevels>,
    },
    PublisherHintsUpdated {
        id: u64,
        hints: Vec<PublisherHint>,
    },
    LocalParticipantConnected {
        participant: ParticipantSid,
        identity: String,
    },
    LocalTrackPublished {
        id: String,
        track: TrackSid,
    },
    LocalTrackPublishFailed {
        id: String,
        error: ServerError,
    },
    LocalTrackWarning {
        id: String,
        warning: String,
    },
    LocalTrackWarningsCleared {
        id: String,
    },
    RecordingChanged {
        is_recording: bool,
    },
    ChannelReady {
        channel: ChannelName,
    },
    ChannelTeardown {
        channel: ChannelName,
    },
    Disconnected {
        error: Option<ServerError>,
    },
}

/// Remote track as seen by the room.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub sid: TrackSid,
    pub kind: TrackKind,
    pub name: String,
    pub priority: TrackPriority,
    pub state: TrackState,
    pub switched_off: bool,
    pub switch_off_reason: Option<SwitchOffReason>,
    pub subscribed: bool,
    /// Id of the attached receiver.
    pub receiver_id: Option<String>,
    pub error: Option<ServerError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantInfo {
    pub sid: ParticipantSid,
    pub identity: String,
    pub revision: u64,
    pub state: ParticipantState,
    pub network_quality_level: Option<u8>,
    pub tracks: Vec<TrackInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalTrackInfo {
    pub id: String,
    pub sid: Option<TrackSid>,
    pub kind: TrackKind,
    pub name: String,
    pub priority: TrackPriority,
    pub state: TrackState,
    pub error: Option<ServerError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalParticipantInfo {
    pub sid: Option<ParticipantSid>,
    pub identity: Option<String>,
    pub revision: u64,
    pub network_quality_level: Option<u8>,
    pub tracks: Vec<LocalTrackInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel: ChannelName,
    pub is_setup: bool,
    pub is_ready: bool,
}

/// Room state snapshot (for debugging/tests).
#[derive(Debug, Clone, PartialEq)]
pub struct RoomState {
    pub local: LocalParticipantInfo,
    pub participants: Vec<ParticipantInfo>,
    pub dominant_speaker: Option<ParticipantSid>,
    pub is_recording: Option<bool>,
    pub channels: Vec<ChannelInfo>,
    pub disconnected: bool,
}

impl RoomState {
    #[must_use]
    pub fn participant(&self, sid: &str) -> Option<&ParticipantInfo> {
        self.participants.iter().find(|p| p.sid.as_str() == sid)
    }

    #[must_use]
    pub fn channel(&self, channel: ChannelName) -> Option<&ChannelInfo> {
        self.channels.iter().find(|c| c.channel == channel)
    }
}

impl ParticipantInfo {
    #[must_use]
    pub fn track(&self, sid: &str) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.sid.as_str() == sid)
    }
}

impl LocalParticipantInfo {
    #[must_use]
    pub fn track(&self, id: &str) -> Option<&LocalTrackInfo> {
        self.tracks.iter().find(|t| t.id == id)
    }
}

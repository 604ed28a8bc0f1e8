//! Side-channel messages.
//!
//! Each side-channel speaks a small JSON protocol whose messages carry a
//! `type` field naming the channel. Inbound messages decode into
//! [`ChannelMessage`]; anything with an unrecognized `type` becomes
//! [`ChannelMessage::Unknown`] so a newer server never breaks an older
//! client. Outbound messages are built as [`OutboundMessage`].

use crate::snapshot::TrackPriority;
use common::error::ServerError;
use common::types::{ParticipantSid, TrackSid};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Message received on a side-channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    /// Loudest participant changed
    ActiveSpeaker {
        #[serde(default)]
        participant: Option<ParticipantSid>,
    },
    NetworkQuality(NetworkQualityReport),
    RenderHints(RenderHintsResponse),
    PublisherHints(PublisherHintsRequest),
    TrackSwitchOff(TrackSwitchOffMessage),
    TrackSubscriptions(TrackSubscriptionsMessage),
    #[serde(other)]
    Unknown,
}

impl ChannelMessage {
    /// Value of the `type` tag, for logging
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ActiveSpeaker { .. } => "active_speaker",
            Self::NetworkQuality(_) => "network_quality",
            Self::RenderHints(_) => "render_hints",
            Self::PublisherHints(_) => "publisher_hints",
            Self::TrackSwitchOff(_) => "track_switch_off",
            Self::TrackSubscriptions(_) => "track_subscriptions",
            Self::Unknown => "unknown",
        }
    }
}

// ----------------------------------------------------------------------------
// Network quality
// ----------------------------------------------------------------------------

/// Send/receive scores for one media kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceiveLevels {
    pub send: u8,
    pub recv: u8,
}

/// Decomposed network quality levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkQualityLevels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<SendReceiveLevels>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<SendReceiveLevels>,
}

impl NetworkQualityLevels {
    /// Overall level: the explicit `level` if present, otherwise the
    /// minimum of the four send/receive scores.
    #[must_use]
    pub fn effective_level(&self) -> Option<u8> {
        if self.level.is_some() {
            return self.level;
        }
        [self.audio, self.video]
            .into_iter()
            .flatten()
            .flat_map(|levels| [levels.send, levels.recv])
            .min()
    }
}

/// The local participant's score: either a bare level or decomposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalNetworkQuality {
    Level(u8),
    Levels(NetworkQualityLevels),
}

/// A remote participant's score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNetworkQuality {
    pub sid: ParticipantSid,
    #[serde(flatten)]
    pub levels: NetworkQualityLevels,
}

/// `network_quality` message from the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct NetworkQualityReport {
    #[serde(default)]
    pub local: Option<LocalNetworkQuality>,
    #[serde(default)]
    pub remotes: Vec<RemoteNetworkQuality>,
}

/// Locally computed network statistics submitted to the server.
///
/// The shape is owned by the statistics collector; it is merged verbatim
/// into the outbound `network_quality` message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkQualityInputs(pub Map<String, Value>);

// ----------------------------------------------------------------------------
// Render hints
// ----------------------------------------------------------------------------

/// Rendered size of a remote video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderDimensions {
    pub width: u32,
    pub height: u32,
}

/// One render hint as sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRenderHint {
    pub track: TrackSid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_dimensions: Option<RenderDimensions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderHintsRequest {
    pub id: u64,
    pub hints: Vec<TrackRenderHint>,
}

/// Result string the server uses for an applied hint.
pub const HINT_RESULT_OK: &str = "OK";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RenderHintResult {
    /// Absent when the server acknowledges the request as a whole.
    #[serde(default)]
    pub track: Option<TrackSid>,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RenderHintResults {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub hints: Vec<RenderHintResult>,
}

/// `render_hints` acknowledgment from the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RenderHintsResponse {
    #[serde(default)]
    pub subscriber: Option<RenderHintResults>,
}

// ----------------------------------------------------------------------------
// Publisher hints
// ----------------------------------------------------------------------------

/// Requested state of one simulcast layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingHint {
    pub enabled: bool,
    pub layer_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublisherHint {
    pub track: TrackSid,
    /// `None` resets the track to its default encodings
    #[serde(default)]
    pub encodings: Option<Vec<EncodingHint>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublisherHints {
    pub id: u64,
    #[serde(default)]
    pub hints: Vec<PublisherHint>,
}

/// `publisher_hints` request from the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct PublisherHintsRequest {
    #[serde(default)]
    pub publisher: Option<PublisherHints>,
}

/// Outcome of applying one publisher hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublisherHintResult {
    Ok,
    UnknownTrack,
    InvalidHint,
    CouldNotApplyHint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherHintOutcome {
    pub track: TrackSid,
    pub result: PublisherHintResult,
}

// ----------------------------------------------------------------------------
// Track switch-off
// ----------------------------------------------------------------------------

/// `track_switch_off` message from the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct TrackSwitchOffMessage {
    #[serde(default)]
    pub off: Vec<TrackSid>,
    #[serde(default)]
    pub on: Vec<TrackSid>,
}

// ----------------------------------------------------------------------------
// Track subscriptions (protocol v3)
// ----------------------------------------------------------------------------

open_enum! {
    /// Delivery state of a subscribed media track
    pub enum MediaTrackState {
        /// Media is flowing
        On => "ON",
        /// Media is switched off
        Off => "OFF",
    }
}

open_enum! {
    /// Why the server switched off a track
    pub enum SwitchOffReason {
        /// Subscriber disabled the track through render hints
        DisabledBySubscriber => "DISABLED_BY_SUBSCRIBER",
        /// Publisher disabled the track
        DisabledByPublisher => "DISABLED_BY_PUBLISHER",
        /// Bandwidth profile limit reached
        MaxBandwidthReached => "MAX_BANDWIDTH_REACHED",
        /// Too many tracks switched on
        MaxTracksSwitchedOff => "MAX_TRACKS_SWITCHED_OFF",
        /// Network congestion
        NetworkCongestion => "NETWORK_CONGESTION",
    }
}

/// Subscription of one media track.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MediaSubscription {
    pub mid: String,
    pub state: MediaTrackState,
    #[serde(default)]
    pub off_reason: Option<SwitchOffReason>,
}

/// Subscription of one data track.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DataSubscription {
    pub label: String,
}

/// `track_subscriptions` message from the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackSubscriptionsMessage {
    pub revision: u64,
    #[serde(default)]
    pub media: BTreeMap<TrackSid, MediaSubscription>,
    #[serde(default)]
    pub data: BTreeMap<TrackSid, DataSubscription>,
    #[serde(default)]
    pub errors: BTreeMap<TrackSid, ServerError>,
}

// ----------------------------------------------------------------------------
// Outbound
// ----------------------------------------------------------------------------

/// Message sent on a side-channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    NetworkQuality {
        #[serde(flatten)]
        inputs: NetworkQualityInputs,
        #[serde(rename = "reportLevel")]
        report_level: u8,
        #[serde(rename = "remoteReportLevel")]
        remote_report_level: u8,
    },
    TrackPriority {
        track: TrackSid,
        subscribe: Option<TrackPriority>,
    },
    RenderHints {
        subscriber: RenderHintsRequest,
    },
    PublisherHints {
        id: u64,
        hints: Vec<PublisherHintOutcome>,
    },
    /// Tells the server a published track's sender was replaced
    ClientReset {
        track: TrackSid,
        id: u64,
    },
}

impl OutboundMessage {
    /// Value of the `type` tag, for logging
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::NetworkQuality { .. } => "network_quality",
            Self::TrackPriority { .. } => "track_priority",
            Self::RenderHints { .. } => "render_hints",
            Self::PublisherHints { .. } => "publisher_hints",
            Self::ClientReset { .. } => "client_reset",
        }
    }
}

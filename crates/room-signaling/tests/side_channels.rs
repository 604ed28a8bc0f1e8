//! Integration tests for the media side-channels.
//!
//! Each test opens one channel through a snapshot announcement and a data
//! receiver, then plays the server end through [`TestDataPeer`].

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::{ParticipantSid, TrackSid};
use media_protocol::message::{
    EncodingHint, NetworkQualityInputs, NetworkQualityLevels, PublisherHint, PublisherHintResult,
};
use media_protocol::snapshot::TrackPriority;
use room_signaling::actors::{NetworkQualitySubject, RoomEvent};
use room_signaling::config::Config;
use room_signaling::errors::RoomError;
use room_signaling::signaling::render_hints::RenderHint;
use room_signaling::signaling::track_priority::PriorityDirection;
use room_signaling::signaling::ChannelName;
use room_signaling::track::NewLocalTrack;
use room_test_utils::{
    channel_label, data_receiver, published_ready, MockPublisherHintApplier, SnapshotBuilder,
    TestParticipant, TestRoom,
};
use serde_json::{json, Map};
use std::time::Duration;

fn pa(sid: &str) -> ParticipantSid {
    ParticipantSid::new(sid)
}

fn mt(sid: &str) -> TrackSid {
    TrackSid::new(sid)
}

fn switched(track: &str, switched_off: bool) -> RoomEvent {
    RoomEvent::TrackSwitchedOff {
        participant: pa("PA1"),
        track: mt(track),
        switched_off,
        reason: None,
    }
}

// ============================================================================
// Channel setup
// ============================================================================

#[tokio::test]
async fn test_channel_ready_after_receiver_delivered() {
    let mut room = TestRoom::spawn(Config::default());
    let label = channel_label(ChannelName::ActiveSpeaker);

    let state = room
        .apply(
            SnapshotBuilder::partial()
                .channel(ChannelName::ActiveSpeaker, &label)
                .build(),
        )
        .await;
    let channel = state.channel(ChannelName::ActiveSpeaker).unwrap().clone();
    assert!(channel.is_setup);
    assert!(!channel.is_ready);
    assert!(room.drain_events().is_empty());

    let (receiver, _peer) = data_receiver(&label);
    room.handle.add_track_receiver(receiver).await.unwrap();
    let state = room.settle().await;

    assert_eq!(
        room.drain_events(),
        vec![RoomEvent::ChannelReady {
            channel: ChannelName::ActiveSpeaker
        }]
    );
    assert!(state.channel(ChannelName::ActiveSpeaker).unwrap().is_ready);
    assert!(!state.channel(ChannelName::NetworkQuality).unwrap().is_setup);
}

#[tokio::test]
async fn test_closed_transport_tears_down_and_channel_can_return() {
    let mut room = TestRoom::spawn(Config::default());
    let peer = room.open_channel(ChannelName::ActiveSpeaker).await;
    room.drain_events();

    drop(peer);
    let state = room.settle().await;
    assert_eq!(
        room.drain_events(),
        vec![RoomEvent::ChannelTeardown {
            channel: ChannelName::ActiveSpeaker
        }]
    );
    assert!(!state.channel(ChannelName::ActiveSpeaker).unwrap().is_setup);

    // Announced again under the same label, the closed receiver is not reused.
    let peer = room.open_channel(ChannelName::ActiveSpeaker).await;
    peer.deliver(&json!({"type": "active_speaker", "participant": "PA1"}));
    let state = room.settle().await;
    assert_eq!(state.dominant_speaker, Some(pa("PA1")));
}

// ============================================================================
// active_speaker
// ============================================================================

#[tokio::test]
async fn test_dominant_speaker_changes() {
    let mut room = TestRoom::spawn(Config::default());
    let peer = room.open_channel(ChannelName::ActiveSpeaker).await;
    room.drain_events();

    peer.deliver_raw(b"not json");
    peer.deliver(&json!({"type": "active_speaker", "participant": "PA1"}));
    peer.deliver(&json!({"type": "active_speaker", "participant": "PA1"}));
    let state = room.settle().await;
    assert_eq!(
        room.drain_events(),
        vec![RoomEvent::DominantSpeakerChanged {
            participant: Some(pa("PA1"))
        }]
    );
    assert_eq!(state.dominant_speaker, Some(pa("PA1")));

    peer.deliver(&json!({"type": "active_speaker", "participant": null}));
    let state = room.settle().await;
    assert_eq!(
        room.drain_events(),
        vec![RoomEvent::DominantSpeakerChanged { participant: None }]
    );
    assert_eq!(state.dominant_speaker, None);
}

// ============================================================================
// track_switch_off
// ============================================================================

#[tokio::test]
async fn test_switch_off_and_conflicting_on() {
    let mut room = TestRoom::spawn(Config::default());
    room.apply(
        SnapshotBuilder::synced()
            .participant(TestParticipant::new("PA1", 1).video("MT1").video("MT2"))
            .build(),
    )
    .await;
    let peer = room.open_channel(ChannelName::TrackSwitchOff).await;
    room.drain_events();

    peer.deliver(&json!({"type": "track_switch_off", "off": ["MT1"]}));
    let state = room.settle().await;
    assert_eq!(room.drain_events(), vec![switched("MT1", true)]);
    assert!(state.participant("PA1").unwrap().track("MT1").unwrap().switched_off);

    // Listed both ways, a track ends up on.
    peer.deliver(&json!({"type": "track_switch_off", "off": ["MT2"], "on": ["MT1", "MT2"]}));
    let state = room.settle().await;
    assert_eq!(room.drain_events(), vec![switched("MT1", false)]);
    let participant = state.participant("PA1").unwrap();
    assert!(!participant.track("MT1").unwrap().switched_off);
    assert!(!participant.track("MT2").unwrap().switched_off);

    peer.deliver(&json!({"type": "track_switch_off"}));
    room.settle().await;
    assert!(room.drain_events().is_empty());
}

#[tokio::test]
async fn test_switch_off_for_unknown_track_applies_on_creation() {
    let mut room = TestRoom::spawn(Config::default());
    let peer = room.open_channel(ChannelName::TrackSwitchOff).await;
    room.drain_events();

    peer.deliver(&json!({"type": "track_switch_off", "off": ["MT5"]}));
    room.settle().await;
    assert!(room.drain_events().is_empty());

    let state = room
        .apply(
            SnapshotBuilder::partial()
                .participant(TestParticipant::new("PA1", 1).video("MT5"))
                .build(),
        )
        .await;
    assert!(room.drain_events().iter().any(|e| matches!(
        e,
        RoomEvent::TrackAdded { track, switched_off: true, .. } if *track == mt("MT5")
    )));
    assert!(state.participant("PA1").unwrap().track("MT5").unwrap().switched_off);
}

#[tokio::test]
async fn test_switch_off_forgotten_when_synced_snapshot_omits_track() {
    let mut room = TestRoom::spawn(Config::default());
    let peer = room.open_channel(ChannelName::TrackSwitchOff).await;

    peer.deliver(&json!({"type": "track_switch_off", "off": ["MT5", "MT6"]}));
    room.settle().await;
    room.apply(
        SnapshotBuilder::synced()
            .participant(TestParticipant::new("PA1", 1).video("MT6"))
            .build(),
    )
    .await;
    room.drain_events();

    let state = room
        .apply(
            SnapshotBuilder::partial()
                .participant(TestParticipant::new("PA1", 2).video("MT5").video("MT6"))
                .build(),
        )
        .await;
    assert!(room.drain_events().iter().any(|e| matches!(
        e,
        RoomEvent::TrackAdded { track, switched_off: false, .. } if *track == mt("MT5")
    )));
    let participant = state.participant("PA1").unwrap();
    assert!(!participant.track("MT5").unwrap().switched_off);
    assert!(participant.track("MT6").unwrap().switched_off);
}

// ============================================================================
// track_priority
// ============================================================================

#[tokio::test]
async fn test_track_priority_replayed_on_ready() {
    let room = TestRoom::spawn(Config::default());
    room.handle
        .set_track_priority(mt("MT1"), PriorityDirection::Subscribe, Some(TrackPriority::High))
        .await
        .unwrap();

    let mut peer = room.open_channel(ChannelName::TrackPriority).await;
    assert_eq!(
        peer.drain_published(),
        vec![json!({"type": "track_priority", "track": "MT1", "subscribe": "high"})]
    );

    room.handle
        .set_track_priority(mt("MT2"), PriorityDirection::Subscribe, None)
        .await
        .unwrap();
    assert_eq!(
        peer.drain_published(),
        vec![json!({"type": "track_priority", "track": "MT2", "subscribe": null})]
    );

    let result = room
        .handle
        .set_track_priority(mt("MT1"), PriorityDirection::Publish, Some(TrackPriority::Low))
        .await;
    assert!(matches!(result, Err(RoomError::Unsupported(_))));
    assert!(peer.drain_published().is_empty());
}

// ============================================================================
// render_hints
// ============================================================================

#[tokio::test]
async fn test_render_hints_one_request_in_flight() {
    let room = TestRoom::spawn(Config::default());
    let hint = |enabled| RenderHint {
        enabled: Some(enabled),
        render_dimensions: None,
    };

    room.handle.set_render_hint(mt("MT1"), hint(true)).await.unwrap();
    let mut peer = room.open_channel(ChannelName::RenderHints).await;
    assert_eq!(
        peer.drain_published(),
        vec![json!({
            "type": "render_hints",
            "subscriber": {"id": 1, "hints": [{"track": "MT1", "enabled": true}]}
        })]
    );

    // Held back until the first request is answered.
    room.handle.set_render_hint(mt("MT2"), hint(false)).await.unwrap();
    room.settle().await;
    assert!(peer.drain_published().is_empty());

    peer.deliver(&json!({
        "type": "render_hints",
        "subscriber": {"id": 1, "hints": [{"track": "MT1", "result": "OK"}]}
    }));
    room.settle().await;
    assert_eq!(
        peer.drain_published(),
        vec![json!({
            "type": "render_hints",
            "subscriber": {"id": 2, "hints": [{"track": "MT2", "enabled": false}]}
        })]
    );
}

#[tokio::test]
async fn test_render_hints_ack_without_track_releases_queue() {
    let room = TestRoom::spawn(Config::default());
    let hint = |enabled| RenderHint {
        enabled: Some(enabled),
        render_dimensions: None,
    };

    room.handle.set_render_hint(mt("MT1"), hint(true)).await.unwrap();
    let mut peer = room.open_channel(ChannelName::RenderHints).await;
    assert_eq!(peer.drain_published().len(), 1);

    room.handle.set_render_hint(mt("MT2"), hint(true)).await.unwrap();
    peer.deliver(&json!({
        "type": "render_hints",
        "subscriber": {"hints": [{"result": "OK"}]}
    }));
    room.settle().await;

    assert_eq!(
        peer.drain_published(),
        vec![json!({
            "type": "render_hints",
            "subscriber": {"id": 2, "hints": [{"track": "MT2", "enabled": true}]}
        })]
    );
}

#[tokio::test]
async fn test_render_hint_cleared_with_removed_track() {
    let room = TestRoom::spawn(Config::default());
    room.apply(
        SnapshotBuilder::synced()
            .participant(TestParticipant::new("PA1", 1).video("MT1"))
            .build(),
    )
    .await;
    room.handle
        .set_render_hint(
            mt("MT1"),
            RenderHint {
                enabled: Some(true),
                render_dimensions: None,
            },
        )
        .await
        .unwrap();

    room.apply(
        SnapshotBuilder::partial()
            .participant(TestParticipant::new("PA1", 2))
            .build(),
    )
    .await;

    let mut peer = room.open_channel(ChannelName::RenderHints).await;
    assert!(peer.drain_published().is_empty());
}

// ============================================================================
// publisher_hints
// ============================================================================

#[tokio::test]
async fn test_publisher_hints_applied_and_answered() {
    let mut room = TestRoom::spawn_with_hints(
        Config::default(),
        MockPublisherHintApplier::builder()
            .result_for("MT9", PublisherHintResult::Ok)
            .build(),
    );
    room.handle
        .add_local_track(NewLocalTrack::new(
            "t1",
            common::types::TrackKind::Video,
            "camera",
        ))
        .await
        .unwrap();
    room.apply(
        SnapshotBuilder::partial()
            .published(1, vec![published_ready("t1", "MT9")])
            .build(),
    )
    .await;
    let mut peer = room.open_channel(ChannelName::PublisherHints).await;
    room.drain_events();

    peer.deliver(&json!({
        "type": "publisher_hints",
        "publisher": {"id": 7, "hints": [
            {"track": "MT9", "encodings": [{"enabled": false, "layer_index": 0}]},
            {"track": "MT99"}
        ]}
    }));
    room.settle().await;

    let encodings = vec![EncodingHint {
        enabled: false,
        layer_index: 0,
    }];
    assert_eq!(
        room.drain_events(),
        vec![RoomEvent::PublisherHintsUpdated {
            id: 7,
            hints: vec![
                PublisherHint {
                    track: mt("MT9"),
                    encodings: Some(encodings.clone()),
                },
                PublisherHint {
                    track: mt("MT99"),
                    encodings: None,
                },
            ],
        }]
    );
    assert_eq!(room.publisher_hints.applied(), vec![(mt("MT9"), Some(encodings))]);
    assert_eq!(
        peer.drain_published(),
        vec![json!({
            "type": "publisher_hints",
            "id": 7,
            "hints": [
                {"track": "MT9", "result": "OK"},
                {"track": "MT99", "result": "UNKNOWN_TRACK"}
            ]
        })]
    );
}

#[tokio::test]
async fn test_track_replaced_needs_ready_channel() {
    let room = TestRoom::spawn(Config::default());

    let result = room.handle.send_track_replaced(mt("MT9")).await;
    assert!(matches!(result, Err(RoomError::ChannelNotReady(_))));

    let mut peer = room.open_channel(ChannelName::PublisherHints).await;
    assert_eq!(room.handle.send_track_replaced(mt("MT9")).await.unwrap(), 1);
    assert_eq!(room.handle.send_track_replaced(mt("MT8")).await.unwrap(), 2);
    assert_eq!(
        peer.drain_published(),
        vec![
            json!({"type": "client_reset", "track": "MT9", "id": 1}),
            json!({"type": "client_reset", "track": "MT8", "id": 2}),
        ]
    );
}

// ============================================================================
// network_quality
// ============================================================================

fn inputs(tag: u64) -> NetworkQualityInputs {
    let mut map = Map::new();
    map.insert("tag".to_string(), json!(tag));
    NetworkQualityInputs(map)
}

fn sent(tag: u64) -> serde_json::Value {
    json!({"type": "network_quality", "tag": tag, "reportLevel": 1, "remoteReportLevel": 0})
}

#[tokio::test(start_paused = true)]
async fn test_network_quality_resend_and_catch_up() {
    let mut room = TestRoom::spawn(Config::default());
    room.apply(
        SnapshotBuilder::synced()
            .participant(TestParticipant::new("PA1", 1))
            .build(),
    )
    .await;
    let mut peer = room.open_channel(ChannelName::NetworkQuality).await;
    room.drain_events();

    room.handle.put_network_quality_inputs(inputs(1));
    room.settle().await;
    assert_eq!(peer.drain_published(), vec![sent(1)]);

    // Nothing is taken again until the resend timer fires.
    room.handle.put_network_quality_inputs(inputs(2));
    room.settle().await;
    assert!(peer.drain_published().is_empty());

    tokio::time::advance(Duration::from_millis(5001)).await;
    room.settle().await;
    assert_eq!(peer.drain_published(), vec![sent(2)]);

    peer.deliver(&json!({
        "type": "network_quality",
        "local": 3,
        "remotes": [{"sid": "PA1", "level": 2}, {"sid": "PA9", "level": 4}]
    }));
    let state = room.settle().await;
    assert_eq!(
        room.drain_events(),
        vec![
            RoomEvent::NetworkQualityLevelChanged {
                subject: NetworkQualitySubject::Local,
                level: Some(3),
                levels: None,
            },
            RoomEvent::NetworkQualityLevelChanged {
                subject: NetworkQualitySubject::Remote(pa("PA1")),
                level: Some(2),
                levels: Some(NetworkQualityLevels {
                    level: Some(2),
                    audio: None,
                    video: None,
                }),
            },
        ]
    );
    assert_eq!(state.local.network_quality_level, Some(3));
    assert_eq!(
        state.participant("PA1").unwrap().network_quality_level,
        Some(2)
    );

    // A response while a resend is armed schedules a catch-up shortly after.
    room.handle.put_network_quality_inputs(inputs(3));
    tokio::time::advance(Duration::from_millis(1001)).await;
    room.settle().await;
    assert_eq!(peer.drain_published(), vec![sent(3)]);
}

#[tokio::test(start_paused = true)]
async fn test_network_quality_inputs_dropped_while_unbound() {
    let room = TestRoom::spawn(Config::default());

    room.handle.put_network_quality_inputs(inputs(1));
    room.settle().await;

    // The cycle keeps running; the next inputs go out once bound and the
    // resend timer has fired.
    let mut peer = room.open_channel(ChannelName::NetworkQuality).await;
    room.handle.put_network_quality_inputs(inputs(2));
    tokio::time::advance(Duration::from_millis(5001)).await;
    room.settle().await;
    assert_eq!(peer.drain_published(), vec![sent(2)]);
}

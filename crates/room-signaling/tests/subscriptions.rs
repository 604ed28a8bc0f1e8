//! Integration tests for subscription binding.
//!
//! v2 binds through the `subscribed` section of snapshots; v3 through the
//! `track_subscriptions` side-channel. Both resolve receivers handed over by
//! the peer-connection layer, in either order.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::{ParticipantSid, TrackKind, TrackSid};
use media_protocol::message::SwitchOffReason;
use room_signaling::actors::RoomEvent;
use room_signaling::config::{Config, ProtocolVersion};
use room_signaling::receiver::TrackReceiver;
use room_signaling::signaling::ChannelName;
use room_signaling::track::TrackState;
use room_test_utils::{
    subscribed_track, subscription_failed, SnapshotBuilder, TestParticipant, TestRoom,
};
use serde_json::json;

fn pa(sid: &str) -> ParticipantSid {
    ParticipantSid::new(sid)
}

fn mt(sid: &str) -> TrackSid {
    TrackSid::new(sid)
}

fn subscribed_event(track: &str, receiver_id: &str) -> RoomEvent {
    RoomEvent::TrackSubscribed {
        participant: pa("PA1"),
        track: mt(track),
        receiver_id: receiver_id.to_string(),
    }
}

fn v3() -> Config {
    Config {
        protocol: ProtocolVersion::V3,
        ..Config::default()
    }
}

// ============================================================================
// v2
// ============================================================================

#[tokio::test]
async fn test_v2_receiver_after_snapshot() {
    let mut room = TestRoom::spawn(Config::default());
    let state = room
        .apply(
            SnapshotBuilder::synced()
                .participant(TestParticipant::new("PA1", 1).audio("MT1"))
                .subscribed(1, vec![subscribed_track("MT1", "r1")])
                .build(),
        )
        .await;
    assert!(!state.participant("PA1").unwrap().track("MT1").unwrap().subscribed);
    room.drain_events();

    room.handle
        .add_track_receiver(TrackReceiver::media("r1", TrackKind::Audio, Some("0".into())))
        .await
        .unwrap();
    let state = room.settle().await;

    assert_eq!(room.drain_events(), vec![subscribed_event("MT1", "r1")]);
    let track = state.participant("PA1").unwrap().track("MT1").unwrap().clone();
    assert!(track.subscribed);
    assert_eq!(track.receiver_id.as_deref(), Some("r1"));
}

#[tokio::test]
async fn test_v2_receiver_before_snapshot() {
    let mut room = TestRoom::spawn(Config::default());
    room.handle
        .add_track_receiver(TrackReceiver::media("r1", TrackKind::Video, None))
        .await
        .unwrap();

    let state = room
        .apply(
            SnapshotBuilder::synced()
                .participant(TestParticipant::new("PA1", 1).video("MT1"))
                .subscribed(1, vec![subscribed_track("MT1", "r1")])
                .build(),
        )
        .await;

    assert!(room.drain_events().contains(&subscribed_event("MT1", "r1")));
    assert!(state.participant("PA1").unwrap().track("MT1").unwrap().subscribed);
}

#[tokio::test]
async fn test_v2_unsubscribe_when_dropped_from_subscribed() {
    let mut room = TestRoom::spawn(Config::default());
    room.handle
        .add_track_receiver(TrackReceiver::media("r1", TrackKind::Audio, None))
        .await
        .unwrap();
    room.apply(
        SnapshotBuilder::synced()
            .participant(TestParticipant::new("PA1", 1).audio("MT1"))
            .subscribed(1, vec![subscribed_track("MT1", "r1")])
            .build(),
    )
    .await;
    room.drain_events();

    // Stale subscribed state keeps the binding.
    room.apply(SnapshotBuilder::partial().subscribed(1, vec![]).build())
        .await;
    assert!(room.drain_events().is_empty());

    let state = room
        .apply(SnapshotBuilder::partial().subscribed(2, vec![]).build())
        .await;
    assert_eq!(
        room.drain_events(),
        vec![RoomEvent::TrackUnsubscribed {
            participant: pa("PA1"),
            track: mt("MT1"),
        }]
    );
    let track = state.participant("PA1").unwrap().track("MT1").unwrap().clone();
    assert!(!track.subscribed);
    assert_eq!(track.receiver_id, None);
}

#[tokio::test]
async fn test_v2_superseded_receiver_is_ignored() {
    let mut room = TestRoom::spawn(Config::default());
    room.apply(
        SnapshotBuilder::synced()
            .participant(TestParticipant::new("PA1", 1).video("MT1"))
            .subscribed(1, vec![subscribed_track("MT1", "r1")])
            .build(),
    )
    .await;
    room.apply(
        SnapshotBuilder::partial()
            .subscribed(2, vec![subscribed_track("MT1", "r2")])
            .build(),
    )
    .await;
    room.drain_events();

    room.handle
        .add_track_receiver(TrackReceiver::media("r1", TrackKind::Video, None))
        .await
        .unwrap();
    let state = room.settle().await;
    assert!(room.drain_events().is_empty());
    assert!(!state.participant("PA1").unwrap().track("MT1").unwrap().subscribed);

    room.handle
        .add_track_receiver(TrackReceiver::media("r2", TrackKind::Video, None))
        .await
        .unwrap();
    let state = room.settle().await;
    assert_eq!(room.drain_events(), vec![subscribed_event("MT1", "r2")]);
    assert_eq!(
        state
            .participant("PA1")
            .unwrap()
            .track("MT1")
            .unwrap()
            .receiver_id
            .as_deref(),
        Some("r2")
    );
}

#[tokio::test]
async fn test_v2_subscription_failure_is_terminal() {
    let mut room = TestRoom::spawn(Config::default());
    let state = room
        .apply(
            SnapshotBuilder::synced()
                .participant(TestParticipant::new("PA1", 1).audio("MT1"))
                .subscribed(1, vec![subscription_failed("MT1", 53_204)])
                .build(),
        )
        .await;

    let events = room.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        RoomEvent::TrackSubscriptionFailed { track, error, .. }
            if *track == mt("MT1") && error.code == 53_204
    )));
    let track = state.participant("PA1").unwrap().track("MT1").unwrap().clone();
    assert_eq!(track.error.unwrap().code, 53_204);

    // A later subscription for the failed track is never bound.
    room.handle
        .add_track_receiver(TrackReceiver::media("r1", TrackKind::Audio, None))
        .await
        .unwrap();
    let state = room
        .apply(
            SnapshotBuilder::partial()
                .subscribed(2, vec![subscribed_track("MT1", "r1")])
                .build(),
        )
        .await;
    assert!(room.drain_events().is_empty());
    assert!(!state.participant("PA1").unwrap().track("MT1").unwrap().subscribed);
}

#[tokio::test]
async fn test_v2_data_track_binds_by_receiver_id() {
    let mut room = TestRoom::spawn(Config::default());
    let (receiver, _peer) = room_test_utils::data_receiver("chat");
    room.handle.add_track_receiver(receiver).await.unwrap();

    let state = room
        .apply(
            SnapshotBuilder::synced()
                .participant(TestParticipant::new("PA1", 1).data("MD1"))
                .subscribed(1, vec![subscribed_track("MD1", "chat")])
                .build(),
        )
        .await;

    assert!(room.drain_events().contains(&RoomEvent::TrackSubscribed {
        participant: pa("PA1"),
        track: mt("MD1"),
        receiver_id: "chat".to_string(),
    }));
    assert!(state.participant("PA1").unwrap().track("MD1").unwrap().subscribed);
}

// ============================================================================
// v3
// ============================================================================

#[tokio::test]
async fn test_v3_media_track_starts_switched_off() {
    let mut room = TestRoom::spawn(v3());
    let state = room
        .apply(
            SnapshotBuilder::synced()
                .participant(TestParticipant::new("PA1", 1).video("MT1").data("MD1"))
                .build(),
        )
        .await;

    let events = room.drain_events();
    assert!(events.contains(&RoomEvent::TrackAdded {
        participant: pa("PA1"),
        track: mt("MT1"),
        kind: TrackKind::Video,
        name: "name-MT1".to_string(),
        enabled: true,
        switched_off: true,
    }));
    assert!(events.contains(&RoomEvent::TrackAdded {
        participant: pa("PA1"),
        track: mt("MD1"),
        kind: TrackKind::Data,
        name: "name-MD1".to_string(),
        enabled: true,
        switched_off: false,
    }));

    let video = state.participant("PA1").unwrap().track("MT1").unwrap().clone();
    assert!(video.switched_off);
    assert_eq!(
        video.switch_off_reason,
        Some(SwitchOffReason::DisabledBySubscriber)
    );
    assert_eq!(state.channels.len(), 7);
}

#[tokio::test]
async fn test_v3_switch_on_binds_by_mid_then_off_keeps_subscription() {
    let mut room = TestRoom::spawn(v3());
    room.apply(
        SnapshotBuilder::synced()
            .participant(TestParticipant::new("PA1", 1).video("MT1"))
            .build(),
    )
    .await;
    let peer = room.open_channel(ChannelName::TrackSubscriptions).await;
    room.drain_events();

    peer.deliver(&json!({
        "type": "track_subscriptions",
        "revision": 1,
        "media": {"MT1": {"mid": "0", "state": "ON"}}
    }));
    room.settle().await;
    assert_eq!(
        room.drain_events(),
        vec![RoomEvent::TrackSwitchedOff {
            participant: pa("PA1"),
            track: mt("MT1"),
            switched_off: false,
            reason: None,
        }]
    );

    room.handle
        .add_track_receiver(TrackReceiver::media("r7", TrackKind::Video, Some("0".into())))
        .await
        .unwrap();
    let state = room.settle().await;
    assert_eq!(room.drain_events(), vec![subscribed_event("MT1", "r7")]);
    assert_eq!(
        state
            .participant("PA1")
            .unwrap()
            .track("MT1")
            .unwrap()
            .receiver_id
            .as_deref(),
        Some("r7")
    );

    peer.deliver(&json!({
        "type": "track_subscriptions",
        "revision": 2,
        "media": {"MT1": {"mid": "0", "state": "OFF", "off_reason": "DISABLED_BY_PUBLISHER"}}
    }));
    let state = room.settle().await;
    let events = room.drain_events();
    assert!(events.contains(&RoomEvent::TrackSwitchedOff {
        participant: pa("PA1"),
        track: mt("MT1"),
        switched_off: true,
        reason: Some(SwitchOffReason::DisabledByPublisher),
    }));
    assert!(events.contains(&RoomEvent::TrackStateChanged {
        participant: pa("PA1"),
        track: mt("MT1"),
        state: TrackState::Disabled,
    }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, RoomEvent::TrackUnsubscribed { .. })));

    let track = state.participant("PA1").unwrap().track("MT1").unwrap().clone();
    assert!(track.subscribed);
    assert_eq!(track.receiver_id, None);
    assert_eq!(track.state, TrackState::Disabled);

    // An unlisted track is unsubscribed.
    peer.deliver(&json!({"type": "track_subscriptions", "revision": 3}));
    room.settle().await;
    assert_eq!(
        room.drain_events(),
        vec![RoomEvent::TrackUnsubscribed {
            participant: pa("PA1"),
            track: mt("MT1"),
        }]
    );
}

#[tokio::test]
async fn test_v3_stale_revision_is_dropped() {
    let mut room = TestRoom::spawn(v3());
    room.apply(
        SnapshotBuilder::synced()
            .participant(TestParticipant::new("PA1", 1).video("MT1"))
            .build(),
    )
    .await;
    let peer = room.open_channel(ChannelName::TrackSubscriptions).await;

    peer.deliver(&json!({
        "type": "track_subscriptions",
        "revision": 5,
        "media": {"MT1": {"mid": "0", "state": "ON"}}
    }));
    room.settle().await;
    room.drain_events();

    peer.deliver(&json!({"type": "track_subscriptions", "revision": 4}));
    let state = room.settle().await;
    assert!(room.drain_events().is_empty());
    assert!(!state.participant("PA1").unwrap().track("MT1").unwrap().switched_off);
}

#[tokio::test]
async fn test_v3_subscription_before_track_is_known() {
    let mut room = TestRoom::spawn(v3());
    let peer = room.open_channel(ChannelName::TrackSubscriptions).await;

    peer.deliver(&json!({
        "type": "track_subscriptions",
        "revision": 1,
        "media": {"MT2": {"mid": "1", "state": "ON"}},
        "errors": {"MT3": {"code": 53_205, "message": "nope"}}
    }));
    room.settle().await;
    room.drain_events();

    room.handle
        .add_track_receiver(TrackReceiver::media("r1", TrackKind::Audio, Some("1".into())))
        .await
        .unwrap();
    let state = room
        .apply(
            SnapshotBuilder::partial()
                .participant(TestParticipant::new("PA1", 1).audio("MT2").audio("MT3"))
                .build(),
        )
        .await;

    let events = room.drain_events();
    assert!(events.contains(&RoomEvent::TrackAdded {
        participant: pa("PA1"),
        track: mt("MT2"),
        kind: TrackKind::Audio,
        name: "name-MT2".to_string(),
        enabled: true,
        switched_off: false,
    }));
    assert!(events.contains(&subscribed_event("MT2", "r1")));
    assert!(events.iter().any(|e| matches!(
        e,
        RoomEvent::TrackSubscriptionFailed { track, error, .. }
            if *track == mt("MT3") && error.code == 53_205
    )));

    let participant = state.participant("PA1").unwrap();
    assert!(participant.track("MT2").unwrap().subscribed);
    assert!(participant.track("MT3").unwrap().error.is_some());
}

#[tokio::test]
async fn test_v3_off_before_bound_is_never_subscribed() {
    let mut room = TestRoom::spawn(v3());
    room.apply(
        SnapshotBuilder::synced()
            .participant(TestParticipant::new("PA1", 1).video("MT1"))
            .build(),
    )
    .await;
    let peer = room.open_channel(ChannelName::TrackSubscriptions).await;
    peer.deliver(&json!({
        "type": "track_subscriptions",
        "revision": 1,
        "media": {"MT1": {"mid": "0", "state": "OFF", "off_reason": "DISABLED_BY_SUBSCRIBER"}}
    }));
    let state = room.settle().await;
    assert!(!state.participant("PA1").unwrap().track("MT1").unwrap().subscribed);
    room.drain_events();

    room.apply(
        SnapshotBuilder::partial()
            .participant(TestParticipant::new("PA1", 2))
            .build(),
    )
    .await;
    let events = room.drain_events();
    assert!(events.contains(&RoomEvent::TrackRemoved {
        participant: pa("PA1"),
        track: mt("MT1"),
    }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, RoomEvent::TrackUnsubscribed { .. })));
}

#[tokio::test]
async fn test_v3_unlisted_pending_subscription_is_forgotten() {
    let mut room = TestRoom::spawn(v3());
    let peer = room.open_channel(ChannelName::TrackSubscriptions).await;

    peer.deliver(&json!({
        "type": "track_subscriptions",
        "revision": 1,
        "media": {"MT2": {"mid": "1", "state": "ON"}}
    }));
    peer.deliver(&json!({"type": "track_subscriptions", "revision": 2}));
    room.settle().await;
    room.drain_events();

    room.handle
        .add_track_receiver(TrackReceiver::media("r1", TrackKind::Audio, Some("1".into())))
        .await
        .unwrap();
    let state = room
        .apply(
            SnapshotBuilder::partial()
                .participant(TestParticipant::new("PA1", 1).audio("MT2"))
                .build(),
        )
        .await;

    let events = room.drain_events();
    assert!(!events.contains(&subscribed_event("MT2", "r1")));
    assert!(events.iter().any(|e| matches!(
        e,
        RoomEvent::TrackAdded { track, switched_off: true, .. } if *track == mt("MT2")
    )));
    assert!(!state.participant("PA1").unwrap().track("MT2").unwrap().subscribed);
}

#[tokio::test]
async fn test_v3_data_track_binds_by_label() {
    let mut room = TestRoom::spawn(v3());
    room.apply(
        SnapshotBuilder::synced()
            .participant(TestParticipant::new("PA1", 1).data("MD1"))
            .build(),
    )
    .await;
    let peer = room.open_channel(ChannelName::TrackSubscriptions).await;
    room.drain_events();

    peer.deliver(&json!({
        "type": "track_subscriptions",
        "revision": 1,
        "data": {"MD1": {"label": "chat"}}
    }));
    room.settle().await;

    let (receiver, _data_peer) = room_test_utils::data_receiver("chat");
    room.handle.add_track_receiver(receiver).await.unwrap();
    let state = room.settle().await;

    assert_eq!(
        room.drain_events(),
        vec![RoomEvent::TrackSubscribed {
            participant: pa("PA1"),
            track: mt("MD1"),
            receiver_id: "chat".to_string(),
        }]
    );
    assert!(state.participant("PA1").unwrap().track("MD1").unwrap().subscribed);
}

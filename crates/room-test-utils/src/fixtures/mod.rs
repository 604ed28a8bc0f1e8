//! Pre-configured test data fixtures for room testing.
//!
//! Provides builders and test data for:
//! - Room snapshots (full and partial)
//! - Remote participants and their tracks
//! - Side-channel data receivers with a scriptable server end
//! - A spawned room wired to recording mocks

use crate::mock_publisher_hints::MockPublisherHintApplier;
use crate::mock_transport::{MockPeerConnectionManager, MockSignalingTransport};
use bytes::Bytes;
use common::error::ServerError;
use common::types::{InstanceIdGenerator, ParticipantSid, TrackKind, TrackSid};
use media_protocol::snapshot::{
    LocalParticipantDescriptor, MediaSignalingDescriptor, ParticipantDescriptor,
    ParticipantState, PublicationState, PublishedState, PublishedTrack, RecordingState,
    RemoteTrackDescriptor, RoomSnapshot, SubscribedState, SubscribedTrack, TrackPriority,
    TransportDescriptor, SNAPSHOT_TYPE_SYNCED, TRANSPORT_TYPE_DATA_CHANNEL,
};
use room_signaling::actors::{RoomActor, RoomCollaborators, RoomEvent, RoomHandle, RoomState};
use room_signaling::config::Config;
use room_signaling::receiver::{DataTransport, DataTransportPeer, TrackReceiver};
use room_signaling::signaling::ChannelName;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Remote participant fixture.
#[derive(Debug, Clone)]
pub struct TestParticipant {
    descriptor: ParticipantDescriptor,
}

impl TestParticipant {
    /// Connected participant with no tracks.
    #[must_use]
    pub fn new(sid: &str, revision: u64) -> Self {
        Self {
            descriptor: ParticipantDescriptor {
                sid: ParticipantSid::new(sid),
                identity: format!("identity-{sid}"),
                revision,
                state: Some(ParticipantState::Connected),
                tracks: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: ParticipantState) -> Self {
        self.descriptor.state = Some(state);
        self
    }

    #[must_use]
    pub fn disconnected(self) -> Self {
        self.with_state(ParticipantState::Disconnected)
    }

    /// Add an enabled track.
    #[must_use]
    pub fn track(mut self, sid: &str, kind: TrackKind) -> Self {
        self.descriptor.tracks.push(RemoteTrackDescriptor {
            sid: TrackSid::new(sid),
            name: format!("name-{sid}"),
            kind,
            enabled: true,
            priority: None,
        });
        self
    }

    #[must_use]
    pub fn audio(self, sid: &str) -> Self {
        self.track(sid, TrackKind::Audio)
    }

    #[must_use]
    pub fn video(self, sid: &str) -> Self {
        self.track(sid, TrackKind::Video)
    }

    #[must_use]
    pub fn data(self, sid: &str) -> Self {
        self.track(sid, TrackKind::Data)
    }

    /// Change the enabled flag of an already added track.
    #[must_use]
    pub fn track_enabled(mut self, sid: &str, enabled: bool) -> Self {
        if let Some(track) = self.descriptor.tracks.iter_mut().find(|t| t.sid.as_str() == sid) {
            track.enabled = enabled;
        }
        self
    }

    /// Change the priority of an already added track.
    #[must_use]
    pub fn track_priority(mut self, sid: &str, priority: TrackPriority) -> Self {
        if let Some(track) = self.descriptor.tracks.iter_mut().find(|t| t.sid.as_str() == sid) {
            track.priority = Some(priority);
        }
        self
    }

    #[must_use]
    pub fn build(self) -> ParticipantDescriptor {
        self.descriptor
    }
}

/// Builder for [`RoomSnapshot`].
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    snapshot: RoomSnapshot,
}

impl SnapshotBuilder {
    /// Full snapshot.
    #[must_use]
    pub fn synced() -> Self {
        Self {
            snapshot: RoomSnapshot {
                kind: Some(SNAPSHOT_TYPE_SYNCED.to_string()),
                ..RoomSnapshot::default()
            },
        }
    }

    /// Partial snapshot.
    #[must_use]
    pub fn partial() -> Self {
        Self {
            snapshot: RoomSnapshot {
                kind: Some("update".to_string()),
                ..RoomSnapshot::default()
            },
        }
    }

    /// The local participant's own identity.
    #[must_use]
    pub fn local(mut self, sid: &str, identity: &str) -> Self {
        self.snapshot.participant = Some(LocalParticipantDescriptor {
            sid: ParticipantSid::new(sid),
            identity: identity.to_string(),
        });
        self
    }

    #[must_use]
    pub fn participant(mut self, participant: TestParticipant) -> Self {
        self.snapshot.participants.push(participant.build());
        self
    }

    /// Local publication states at `revision`.
    #[must_use]
    pub fn published(mut self, revision: u64, tracks: Vec<PublishedTrack>) -> Self {
        self.snapshot.published = Some(PublishedState { revision, tracks });
        self
    }

    /// v2 subscription results at `revision`.
    #[must_use]
    pub fn subscribed(mut self, revision: u64, tracks: Vec<SubscribedTrack>) -> Self {
        self.snapshot.subscribed = Some(SubscribedState { revision, tracks });
        self
    }

    #[must_use]
    pub fn recording(mut self, revision: u64, is_recording: bool) -> Self {
        self.snapshot.recording = Some(RecordingState {
            revision,
            is_recording,
        });
        self
    }

    #[must_use]
    pub fn peer_connections(mut self, peer_connections: Vec<Value>) -> Self {
        self.snapshot.peer_connections = Some(peer_connections);
        self
    }

    /// Announce `channel` over a data channel labeled `label`.
    #[must_use]
    pub fn channel(mut self, channel: ChannelName, label: &str) -> Self {
        self.snapshot
            .media_signaling
            .get_or_insert_with(HashMap::new)
            .insert(
                channel.as_str().to_string(),
                MediaSignalingDescriptor {
                    transport: Some(TransportDescriptor {
                        kind: TRANSPORT_TYPE_DATA_CHANNEL.to_string(),
                        label: Some(label.to_string()),
                    }),
                },
            );
        self
    }

    #[must_use]
    pub fn build(self) -> RoomSnapshot {
        self.snapshot
    }
}

/// Data-channel label used by [`SnapshotBuilder::channel`] fixtures.
#[must_use]
pub fn channel_label(channel: ChannelName) -> String {
    format!("ds-{}", channel.as_str())
}

/// Local publication that the server has acknowledged with `sid`.
#[must_use]
pub fn published_ready(id: &str, sid: &str) -> PublishedTrack {
    PublishedTrack {
        id: id.to_string(),
        sid: Some(TrackSid::new(sid)),
        state: Some(PublicationState::Ready),
        error: None,
        media_states: None,
    }
}

/// Local publication the server refused.
#[must_use]
pub fn published_failed(id: &str, code: u32) -> PublishedTrack {
    PublishedTrack {
        id: id.to_string(),
        sid: None,
        state: Some(PublicationState::Failed),
        error: Some(ServerError::new(code, "publish failed")),
        media_states: None,
    }
}

/// v2 subscription bound to receiver `id`.
#[must_use]
pub fn subscribed_track(sid: &str, id: &str) -> SubscribedTrack {
    SubscribedTrack {
        sid: TrackSid::new(sid),
        id: Some(id.to_string()),
        error: None,
    }
}

/// v2 subscription the server could not complete.
#[must_use]
pub fn subscription_failed(sid: &str, code: u32) -> SubscribedTrack {
    SubscribedTrack {
        sid: TrackSid::new(sid),
        id: None,
        error: Some(ServerError::new(code, "subscribe failed")),
    }
}

/// Server end of a data channel.
#[derive(Debug)]
pub struct TestDataPeer {
    peer: DataTransportPeer,
}

impl TestDataPeer {
    /// Deliver a JSON message to the client.
    pub fn deliver(&self, message: &Value) {
        self.peer
            .deliver
            .send(Bytes::from(serde_json::to_vec(message).unwrap()))
            .unwrap();
    }

    /// Deliver raw bytes to the client.
    pub fn deliver_raw(&self, bytes: &'static [u8]) {
        self.peer.deliver.send(Bytes::from_static(bytes)).unwrap();
    }

    /// Wait for the next message the client published.
    pub async fn next_published(&mut self) -> Value {
        let bytes = self.peer.published.recv().await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Every message the client has published and not yet been read.
    pub fn drain_published(&mut self) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Ok(bytes) = self.peer.published.try_recv() {
            messages.push(serde_json::from_slice(&bytes).unwrap());
        }
        messages
    }
}

/// Data receiver with id `label` and its server end.
#[must_use]
pub fn data_receiver(label: &str) -> (TrackReceiver, TestDataPeer) {
    let (transport, peer) = DataTransport::channel();
    (TrackReceiver::data(label, transport), TestDataPeer { peer })
}

/// A spawned room wired to recording mocks.
pub struct TestRoom {
    pub handle: RoomHandle,
    pub task: JoinHandle<()>,
    pub transport: Arc<MockSignalingTransport>,
    pub peer_connections: Arc<MockPeerConnectionManager>,
    pub publisher_hints: Arc<MockPublisherHintApplier>,
    pub events: broadcast::Receiver<RoomEvent>,
}

impl TestRoom {
    #[must_use]
    pub fn spawn(config: Config) -> Self {
        Self::spawn_with_hints(config, MockPublisherHintApplier::default())
    }

    #[must_use]
    pub fn spawn_with_hints(config: Config, applier: MockPublisherHintApplier) -> Self {
        let transport = Arc::new(MockSignalingTransport::new());
        let peer_connections = Arc::new(MockPeerConnectionManager::new());
        let publisher_hints = Arc::new(applier);
        let collaborators = RoomCollaborators::new(transport.clone(), peer_connections.clone())
            .with_publisher_hints(publisher_hints.clone());

        let (handle, task) = RoomActor::spawn(
            config,
            collaborators,
            &InstanceIdGenerator::new(),
            CancellationToken::new(),
        );
        let events = handle.subscribe();

        Self {
            handle,
            task,
            transport,
            peer_connections,
            publisher_hints,
            events,
        }
    }

    /// Let spawned work (receiver resolution, hint application) re-enter the
    /// room, then return its state.
    pub async fn settle(&self) -> RoomState {
        for _ in 0..4 {
            tokio::task::yield_now().await;
            self.handle.get_state().await.unwrap();
        }
        self.handle.get_state().await.unwrap()
    }

    /// Events emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Apply `snapshot` and wait for it to settle.
    pub async fn apply(&self, snapshot: RoomSnapshot) -> RoomState {
        self.handle.receive_snapshot(snapshot).await.unwrap();
        self.settle().await
    }

    /// Announce `channel` in a partial snapshot, hand the room its data
    /// receiver and return the server end once the channel is bound.
    pub async fn open_channel(&self, channel: ChannelName) -> TestDataPeer {
        let label = channel_label(channel);
        let (receiver, peer) = data_receiver(&label);
        self.handle
            .receive_snapshot(SnapshotBuilder::partial().channel(channel, &label).build())
            .await
            .unwrap();
        self.handle.add_track_receiver(receiver).await.unwrap();
        let state = self.settle().await;
        assert!(state.channel(channel).unwrap().is_ready);
        peer
    }
}

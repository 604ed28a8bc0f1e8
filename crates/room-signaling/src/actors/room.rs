//! `RoomActor` - owns all room state.
//!
//! The actor:
//! - Applies server snapshots (participants, tracks, subscriptions, local
//!   publications, recording) with per-stream revision gating
//! - Sets up side-channels announced in snapshots and pumps their transports
//! - Runs the network quality send cycle for the life of the room
//! - Publishes local participant state, coalesced per mailbox drain
//! - Broadcasts [`RoomEvent`]s
//!
//! Anything that has to wait (a receiver the peer-connection layer has not
//! delivered yet, network quality inputs, publisher hint application) is
//! spawned into a `JoinSet` and its result is fed back into the actor loop
//! as a continuation. Late results are rejected by channel generation or by
//! the pending key on the publication.

use super::messages::{ChannelInfo, NetworkQualitySubject, RoomEvent, RoomMessage, RoomState};
use super::strategy::{strategy_for, SubscriptionStrategy};
use crate::async_var::AsyncVar;
use crate::collaborators::{
    NoopPublisherHintApplier, PeerConnectionManager, PublisherHintApplier, SignalingTransport,
};
use crate::config::{Config, ProtocolVersion};
use crate::errors::RoomError;
use crate::observability::metrics;
use crate::participant::{Registry, RegistryChanges};
use crate::pending::{PendingReceivers, ReceiverKey};
use crate::receiver::TrackReceiver;
use crate::recording::Recording;
use crate::signaling::dominant_speaker::{DominantSpeakerChanged, DominantSpeakerSignaling};
use crate::signaling::network_quality::{NetworkQualityEvent, NetworkQualitySignaling};
use crate::signaling::publisher_hints::{PublisherHintsRequested, PublisherHintsSignaling};
use crate::signaling::render_hints::{RenderHint, RenderHintsSignaling};
use crate::signaling::track_priority::{PriorityDirection, TrackPrioritySignaling};
use crate::signaling::track_subscriptions::TrackSubscriptionsSignaling;
use crate::signaling::track_switch_off::{SwitchOffUpdate, TrackSwitchOffSignaling};
use crate::signaling::{
    spawn_pump, BindOutcome, ChannelControl, ChannelName, ChannelSignal, MediaSignaling,
};
use crate::track::local::{LocalParticipant, NewLocalTrack};
use crate::track::remote::{RemoteTrackPublication, SwitchOffState};
use common::error::ServerError;
use common::types::{InstanceId, InstanceIdGenerator, ParticipantSid, TrackSid};
use media_protocol::codec::{decode_message, decode_snapshot};
use media_protocol::message::{
    ChannelMessage, NetworkQualityInputs, PublisherHint, PublisherHintOutcome, PublisherHintResult,
};
use media_protocol::snapshot::{RemoteTrackDescriptor, RoomSnapshot, TrackPriority};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// The layers the room drives.
#[derive(Clone)]
pub struct RoomCollaborators {
    pub transport: Arc<dyn SignalingTransport>,
    pub peer_connections: Arc<dyn PeerConnectionManager>,
    pub publisher_hints: Arc<dyn PublisherHintApplier>,
}

impl RoomCollaborators {
    /// Collaborators without access to local senders; every publisher hint
    /// for a known track is answered with `COULD_NOT_APPLY_HINT`.
    pub fn new(
        transport: Arc<dyn SignalingTransport>,
        peer_connections: Arc<dyn PeerConnectionManager>,
    ) -> Self {
        Self {
            transport,
            peer_connections,
            publisher_hints: Arc::new(NoopPublisherHintApplier),
        }
    }

    #[must_use]
    pub fn with_publisher_hints(mut self, applier: Arc<dyn PublisherHintApplier>) -> Self {
        self.publisher_hints = applier;
        self
    }
}

/// Handle to a `RoomActor`.
#[derive(Clone)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    events: broadcast::Sender<RoomEvent>,
    network_quality_inputs: Arc<AsyncVar<NetworkQualityInputs>>,
    room_id: InstanceId,
}

impl RoomHandle {
    #[must_use]
    pub fn room_id(&self) -> InstanceId {
        self.room_id
    }

    /// Subscribe to room events. Only events emitted after this call are
    /// received.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    async fn send(&self, message: RoomMessage) -> Result<(), RoomError> {
        if self.cancel_token.is_cancelled() {
            return Err(RoomError::Disconnected);
        }
        self.sender.send(message).await.map_err(|e| {
            debug!(target: "room.actor", error = %e, "channel send failed");
            RoomError::Disconnected
        })
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(message(tx)).await?;
        rx.await.map_err(|e| {
            debug!(target: "room.actor", error = %e, "response receive failed");
            RoomError::Disconnected
        })
    }

    /// Apply a server snapshot.
    pub async fn receive_snapshot(&self, snapshot: RoomSnapshot) -> Result<(), RoomError> {
        self.send(RoomMessage::ReceiveSnapshot {
            snapshot: Box::new(snapshot),
        })
        .await
    }

    /// Decode and apply a snapshot received as JSON.
    pub async fn receive_snapshot_bytes(&self, data: &[u8]) -> Result<(), RoomError> {
        let snapshot = decode_snapshot(data).map_err(|e| {
            metrics::record_snapshot("invalid");
            warn!(target: "room.actor", error = %e, "Failed to decode room snapshot");
            RoomError::from(e)
        })?;
        self.receive_snapshot(snapshot).await
    }

    /// Hand over a receiver delivered by the peer-connection layer.
    pub async fn add_track_receiver(&self, receiver: TrackReceiver) -> Result<(), RoomError> {
        self.send(RoomMessage::AddTrackReceiver { receiver }).await
    }

    pub async fn add_local_track(&self, track: NewLocalTrack) -> Result<(), RoomError> {
        self.request(|respond_to| RoomMessage::AddLocalTrack { track, respond_to })
            .await?
    }

    pub async fn remove_local_track(&self, id: impl Into<String>) -> Result<(), RoomError> {
        let id = id.into();
        self.request(|respond_to| RoomMessage::RemoveLocalTrack { id, respond_to })
            .await?
    }

    pub async fn set_local_track_enabled(
        &self,
        id: impl Into<String>,
        enabled: bool,
    ) -> Result<(), RoomError> {
        let id = id.into();
        self.request(|respond_to| RoomMessage::SetLocalTrackEnabled {
            id,
            enabled,
            respond_to,
        })
        .await?
    }

    pub async fn set_local_track_priority(
        &self,
        id: impl Into<String>,
        priority: TrackPriority,
    ) -> Result<(), RoomError> {
        let id = id.into();
        self.request(|respond_to| RoomMessage::SetLocalTrackPriority {
            id,
            priority,
            respond_to,
        })
        .await?
    }

    pub async fn set_bandwidth_profile(&self, profile: Value) -> Result<(), RoomError> {
        self.send(RoomMessage::SetBandwidthProfile { profile }).await
    }

    /// Publish peer-connection state right away, without waiting for a
    /// local state change.
    pub async fn publish_peer_connection_state(&self, state: Value) -> Result<(), RoomError> {
        self.send(RoomMessage::PublishPeerConnectionState { state })
            .await
    }

    /// Change the priority of a remote track.
    ///
    /// # Errors
    ///
    /// [`RoomError::Unsupported`] for [`PriorityDirection::Publish`].
    pub async fn set_track_priority(
        &self,
        track: TrackSid,
        direction: PriorityDirection,
        priority: Option<TrackPriority>,
    ) -> Result<(), RoomError> {
        self.request(|respond_to| RoomMessage::SetTrackPriority {
            track,
            direction,
            priority,
            respond_to,
        })
        .await?
    }

    pub async fn set_render_hint(&self, track: TrackSid, hint: RenderHint) -> Result<(), RoomError> {
        self.send(RoomMessage::SetRenderHint { track, hint }).await
    }

    pub async fn clear_render_hint(&self, track: TrackSid) -> Result<(), RoomError> {
        self.send(RoomMessage::ClearRenderHint { track }).await
    }

    /// Returns the request id.
    ///
    /// # Errors
    ///
    /// [`RoomError::ChannelNotReady`] when the publisher hints channel has
    /// no bound transport.
    pub async fn send_track_replaced(&self, track: TrackSid) -> Result<u64, RoomError> {
        self.request(|respond_to| RoomMessage::SendTrackReplaced { track, respond_to })
            .await?
    }

    /// Provide the next network quality inputs. Never blocks.
    pub fn put_network_quality_inputs(&self, inputs: NetworkQualityInputs) {
        self.network_quality_inputs.put(inputs);
    }

    pub async fn get_state(&self) -> Result<RoomState, RoomError> {
        self.request(|respond_to| RoomMessage::GetState { respond_to })
            .await
    }

    /// Tear the room down. Succeeds if the room is already gone.
    pub async fn disconnect(&self, error: Option<ServerError>) -> Result<(), RoomError> {
        match self
            .request(|respond_to| RoomMessage::Disconnect { error, respond_to })
            .await
        {
            Err(RoomError::Disconnected) => Ok(()),
            other => other,
        }
    }

    /// Cancel the room actor. The room disconnects without an error.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Results of work the actor spawned and is waiting on.
#[derive(Debug)]
enum Continuation {
    TrackReceiver {
        participant: ParticipantSid,
        track: TrackSid,
        key: ReceiverKey,
        receiver: Option<TrackReceiver>,
    },
    ChannelReceiver {
        channel: ChannelName,
        generation: u64,
        receiver: Option<TrackReceiver>,
    },
    NetworkQualityInputs(Option<NetworkQualityInputs>),
    PublisherHintResults {
        generation: u64,
        id: u64,
        outcomes: Vec<PublisherHintOutcome>,
    },
}

/// Every side-channel of the room.
#[derive(Debug)]
pub(crate) struct Channels {
    pub(crate) active_speaker: MediaSignaling<DominantSpeakerSignaling>,
    pub(crate) network_quality: MediaSignaling<NetworkQualitySignaling>,
    pub(crate) track_priority: MediaSignaling<TrackPrioritySignaling>,
    pub(crate) render_hints: MediaSignaling<RenderHintsSignaling>,
    pub(crate) publisher_hints: MediaSignaling<PublisherHintsSignaling>,
    pub(crate) track_switch_off: MediaSignaling<TrackSwitchOffSignaling>,
    pub(crate) track_subscriptions: Option<MediaSignaling<TrackSubscriptionsSignaling>>,
}

impl Channels {
    fn new(
        config: &Config,
        inputs: Arc<AsyncVar<NetworkQualityInputs>>,
        with_subscriptions: bool,
    ) -> Self {
        Self {
            active_speaker: MediaSignaling::new(DominantSpeakerSignaling::new()),
            network_quality: MediaSignaling::new(NetworkQualitySignaling::new(
                config.network_quality,
                inputs,
            )),
            track_priority: MediaSignaling::new(TrackPrioritySignaling::new()),
            render_hints: MediaSignaling::new(RenderHintsSignaling::new()),
            publisher_hints: MediaSignaling::new(PublisherHintsSignaling::new()),
            track_switch_off: MediaSignaling::new(TrackSwitchOffSignaling::new()),
            track_subscriptions: with_subscriptions
                .then(|| MediaSignaling::new(TrackSubscriptionsSignaling::new())),
        }
    }

    fn names(&self) -> Vec<ChannelName> {
        let mut names = ChannelName::COMMON.to_vec();
        if self.track_subscriptions.is_some() {
            names.push(ChannelName::TrackSubscriptions);
        }
        names
    }

    fn control(&self, channel: ChannelName) -> Option<&dyn ChannelControl> {
        match channel {
            ChannelName::ActiveSpeaker => Some(&self.active_speaker),
            ChannelName::NetworkQuality => Some(&self.network_quality),
            ChannelName::TrackPriority => Some(&self.track_priority),
            ChannelName::RenderHints => Some(&self.render_hints),
            ChannelName::PublisherHints => Some(&self.publisher_hints),
            ChannelName::TrackSwitchOff => Some(&self.track_switch_off),
            ChannelName::TrackSubscriptions => self
                .track_subscriptions
                .as_ref()
                .map(|c| c as &dyn ChannelControl),
        }
    }

    fn control_mut(&mut self, channel: ChannelName) -> Option<&mut dyn ChannelControl> {
        match channel {
            ChannelName::ActiveSpeaker => Some(&mut self.active_speaker),
            ChannelName::NetworkQuality => Some(&mut self.network_quality),
            ChannelName::TrackPriority => Some(&mut self.track_priority),
            ChannelName::RenderHints => Some(&mut self.render_hints),
            ChannelName::PublisherHints => Some(&mut self.publisher_hints),
            ChannelName::TrackSwitchOff => Some(&mut self.track_switch_off),
            ChannelName::TrackSubscriptions => self
                .track_subscriptions
                .as_mut()
                .map(|c| c as &mut dyn ChannelControl),
        }
    }
}

/// Room state, shared with the subscription strategy.
pub struct RoomCore {
    pub(crate) registry: Registry,
    /// Switch-off state for tracks not yet in the registry.
    pub(crate) pending_switch_off: HashMap<TrackSid, SwitchOffState>,
    /// Events produced since the last flush.
    pub(crate) pending_events: Vec<RoomEvent>,
    local: LocalParticipant,
    recording: Recording,
    pending: PendingReceivers,
    channels: Channels,
    dominant_speaker: Option<ParticipantSid>,
    events: broadcast::Sender<RoomEvent>,
    collaborators: RoomCollaborators,
    continuations: JoinSet<Continuation>,
    pumps: Vec<JoinHandle<()>>,
    signals: mpsc::UnboundedSender<ChannelSignal>,
    cancel_token: CancellationToken,
    disconnected: bool,
}

impl RoomCore {
    /// Mark a remote track as waiting for the receiver with `key` and start
    /// waiting for it.
    pub(crate) fn await_receiver(
        &mut self,
        participant: ParticipantSid,
        track: TrackSid,
        key: ReceiverKey,
    ) {
        let Some(publication) = self
            .registry
            .get_mut(&participant)
            .and_then(|p| p.track_mut(&track))
        else {
            return;
        };
        if !publication.set_pending(key.clone()) {
            return;
        }

        debug!(target: "room.registry", track = %track, key = %key, "Waiting for receiver");
        let slot = self.pending.wait(key.clone());
        self.continuations.spawn(async move {
            Continuation::TrackReceiver {
                participant,
                track,
                key,
                receiver: slot.await.ok(),
            }
        });
    }

    fn apply_participants(
        &mut self,
        snapshot: &RoomSnapshot,
        local: Option<&ParticipantSid>,
        strategy: &dyn SubscriptionStrategy,
    ) -> RegistryChanges {
        let pending_switch_off = &mut self.pending_switch_off;
        let mut factory = |participant: &ParticipantSid, descriptor: &RemoteTrackDescriptor| {
            let switch_off = pending_switch_off
                .remove(&descriptor.sid)
                .unwrap_or_else(|| strategy.default_switch_off(&descriptor.sid, descriptor.kind));
            RemoteTrackPublication::new(
                participant.clone(),
                descriptor,
                switch_off,
                strategy.enabled_source(),
            )
        };
        self.registry.apply(
            &snapshot.participants,
            local,
            snapshot.is_synced(),
            &mut factory,
            &mut self.pending_events,
        )
    }

    /// Drop cached switch-off state for tracks a full snapshot no longer
    /// lists.
    fn forget_unlisted_switch_off(&mut self, snapshot: &RoomSnapshot) {
        let listed: HashSet<&TrackSid> = snapshot
            .participants
            .iter()
            .flat_map(|participant| participant.tracks.iter().map(|track| &track.sid))
            .collect();
        let before = self.pending_switch_off.len();
        self.pending_switch_off.retain(|sid, _| listed.contains(sid));
        let dropped = before - self.pending_switch_off.len();
        if dropped > 0 {
            debug!(target: "room.registry", dropped, "Forgot switch-off state for unlisted tracks");
        }
    }

    fn setup_channels(&mut self, snapshot: &RoomSnapshot) {
        for channel in self.channels.names() {
            let Some(label) = snapshot.data_channel_label(channel.as_str()) else {
                continue;
            };
            let Some(control) = self.channels.control_mut(channel) else {
                continue;
            };
            if control.is_setup() {
                continue;
            }
            let generation = control.setup(label.to_string());
            let slot = self.pending.wait(ReceiverKey::Id(label.to_string()));
            self.continuations.spawn(async move {
                Continuation::ChannelReceiver {
                    channel,
                    generation,
                    receiver: slot.await.ok(),
                }
            });
        }
    }

    fn bind_channel(&mut self, channel: ChannelName, generation: u64, receiver: &TrackReceiver) {
        let Some(control) = self.channels.control_mut(channel) else {
            return;
        };
        match control.bind(generation, receiver) {
            BindOutcome::Bound(pump) => {
                self.pumps.retain(|pump| !pump.is_finished());
                self.pumps.push(spawn_pump(pump, self.signals.clone()));
                self.pending_events.push(RoomEvent::ChannelReady { channel });
            }
            BindOutcome::Mismatch => {}
            BindOutcome::Stale => debug!(
                target: "room.actor",
                channel = %channel,
                generation,
                "Ignoring receiver resolved for a previous setup"
            ),
        }
    }

    fn attach_receiver(
        &mut self,
        participant: &ParticipantSid,
        track: &TrackSid,
        key: &ReceiverKey,
        receiver: TrackReceiver,
    ) {
        let Some(publication) = self
            .registry
            .get_mut(participant)
            .and_then(|p| p.track_mut(track))
        else {
            debug!(target: "room.registry", track = %track, "Receiver resolved for removed track");
            return;
        };
        if publication.pending_key() != Some(key) {
            debug!(
                target: "room.registry",
                track = %track,
                key = %key,
                "Receiver resolved for a superseded subscription"
            );
            return;
        }
        publication.attach(receiver, &mut self.pending_events);
    }

    fn start_network_quality_cycle(&mut self) {
        if let Some(take) = self.channels.network_quality.protocol_mut().start_cycle() {
            self.continuations
                .spawn(async move { Continuation::NetworkQualityInputs(take.await) });
        }
    }

    fn network_quality_deadline(&mut self) {
        let now = Instant::now();
        if self.channels.network_quality.protocol_mut().on_deadline(now) {
            self.start_network_quality_cycle();
        }
    }

    fn network_quality_changed(&mut self, event: NetworkQualityEvent) {
        match event {
            NetworkQualityEvent::Local { level, levels } => {
                self.pending_events.push(RoomEvent::NetworkQualityLevelChanged {
                    subject: NetworkQualitySubject::Local,
                    level: Some(level),
                    levels,
                });
            }
            NetworkQualityEvent::Remote {
                participant,
                level,
                levels,
            } => {
                let Some(remote) = self.registry.get_mut(&participant) else {
                    return;
                };
                remote.set_network_quality_level(level);
                self.pending_events.push(RoomEvent::NetworkQualityLevelChanged {
                    subject: NetworkQualitySubject::Remote(participant),
                    level,
                    levels: Some(levels),
                });
            }
        }
    }

    fn publisher_hints_requested(&mut self, generation: u64, request: PublisherHintsRequested) {
        self.pending_events.push(RoomEvent::PublisherHintsUpdated {
            id: request.id,
            hints: request.hints.clone(),
        });

        let hints: Vec<(PublisherHint, bool)> = request
            .hints
            .into_iter()
            .map(|hint| {
                let known = self.local.find_by_sid(&hint.track).is_some();
                (hint, known)
            })
            .collect();
        let applier = Arc::clone(&self.collaborators.publisher_hints);
        let id = request.id;

        self.continuations.spawn(async move {
            let mut outcomes = Vec::with_capacity(hints.len());
            for (hint, known) in hints {
                let result = if known {
                    applier
                        .apply_hint(&hint.track, hint.encodings.as_deref())
                        .await
                } else {
                    PublisherHintResult::UnknownTrack
                };
                outcomes.push(PublisherHintOutcome {
                    track: hint.track,
                    result,
                });
            }
            Continuation::PublisherHintResults {
                generation,
                id,
                outcomes,
            }
        });
    }

    fn apply_switch_off(&mut self, update: SwitchOffUpdate) {
        for (sid, off) in update.states {
            match self.registry.track_mut(&sid) {
                Some(publication) => publication.set_switched_off(off, None, &mut self.pending_events),
                None => {
                    self.pending_switch_off
                        .insert(sid, SwitchOffState { off, reason: None });
                }
            }
        }
    }

    fn publish_local_state(&mut self) {
        if let Some(update) = self.local.take_update() {
            debug!(
                target: "room.actor",
                revision = update.participant.revision,
                "Publishing local participant state"
            );
            self.collaborators.transport.publish(update);
            self.collaborators
                .peer_connections
                .set_track_senders(&self.local.track_ids());
        }
    }

    fn emit_events(&mut self) {
        if self.pending_events.is_empty() {
            return;
        }
        for event in std::mem::take(&mut self.pending_events) {
            if let RoomEvent::TrackRemoved { track, .. } | RoomEvent::TrackUnsubscribed { track, .. } =
                &event
            {
                self.channels.render_hints.protocol_mut().clear_track_hint(track);
            }
            // No subscribers is not an error.
            let _ = self.events.send(event);
        }
        metrics::set_participants_active(self.registry.len());
    }

    fn flush(&mut self) {
        self.publish_local_state();
        self.emit_events();
        self.pending.prune_closed();
    }

    fn disconnect(&mut self, error: Option<ServerError>) {
        if self.disconnected {
            return;
        }
        info!(
            target: "room.actor",
            participants = self.registry.len(),
            code = error.as_ref().map(|e| e.code),
            "Room disconnecting"
        );

        for channel in self.channels.names() {
            if let Some(control) = self.channels.control_mut(channel) {
                if control.teardown() {
                    self.pending_events.push(RoomEvent::ChannelTeardown { channel });
                }
            }
        }
        self.local.disconnect(&mut self.pending_events);
        self.registry.disconnect_all(&mut self.pending_events);
        self.collaborators.peer_connections.close();
        self.continuations.abort_all();
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        self.pending.clear();
        self.pending_events.push(RoomEvent::Disconnected { error });
        self.disconnected = true;
        self.emit_events();
        self.cancel_token.cancel();
    }

    fn state(&self) -> RoomState {
        let names = self.channels.names();
        RoomState {
            local: self
                .local
                .info(self.channels.network_quality.protocol().level()),
            participants: self.registry.info(),
            dominant_speaker: self.dominant_speaker.clone(),
            is_recording: self.recording.is_recording(),
            channels: names
                .into_iter()
                .filter_map(|channel| {
                    self.channels.control(channel).map(|control| ChannelInfo {
                        channel,
                        is_setup: control.is_setup(),
                        is_ready: control.is_ready(),
                    })
                })
                .collect(),
            disconnected: self.disconnected,
        }
    }
}

/// The room actor.
pub struct RoomActor {
    room_id: InstanceId,
    core: RoomCore,
    strategy: Box<dyn SubscriptionStrategy>,
    receiver: mpsc::Receiver<RoomMessage>,
    signals: mpsc::UnboundedReceiver<ChannelSignal>,
    cancel_token: CancellationToken,
}

impl RoomActor {
    /// Spawn the room actor.
    ///
    /// Returns a handle and the task handle.
    pub fn spawn(
        config: Config,
        collaborators: RoomCollaborators,
        ids: &InstanceIdGenerator,
        cancel_token: CancellationToken,
    ) -> (RoomHandle, JoinHandle<()>) {
        let room_id = ids.next_id();
        let (sender, receiver) = mpsc::channel(config.mailbox_capacity.max(1));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let inputs = Arc::new(AsyncVar::new());
        let strategy = strategy_for(config.protocol);

        let core = RoomCore {
            registry: Registry::new(),
            pending_switch_off: HashMap::new(),
            pending_events: Vec::new(),
            local: LocalParticipant::new(),
            recording: Recording::new(),
            pending: PendingReceivers::new(),
            channels: Channels::new(
                &config,
                Arc::clone(&inputs),
                config.protocol == ProtocolVersion::V3,
            ),
            dominant_speaker: None,
            events: events.clone(),
            collaborators,
            continuations: JoinSet::new(),
            pumps: Vec::new(),
            signals: signals_tx,
            cancel_token: cancel_token.clone(),
            disconnected: false,
        };

        let actor = Self {
            room_id,
            core,
            strategy,
            receiver,
            signals,
            cancel_token: cancel_token.clone(),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomHandle {
            sender,
            cancel_token,
            events,
            network_quality_inputs: inputs,
            room_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "room.actor", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "room.actor",
            room_id = %self.room_id,
            protocol = %self.strategy.protocol(),
            "RoomActor started"
        );

        self.core.start_network_quality_cycle();

        loop {
            let deadline = self
                .core
                .channels
                .network_quality
                .protocol()
                .next_deadline();

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "room.actor",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.core.disconnect(None);
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            while !self.core.disconnected {
                                let Ok(message) = self.receiver.try_recv() else {
                                    break;
                                };
                                self.handle_message(message);
                            }
                        }
                        None => {
                            info!(
                                target: "room.actor",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            self.core.disconnect(None);
                            break;
                        }
                    }
                }

                Some(signal) = self.signals.recv() => {
                    self.handle_signal(signal);
                }

                Some(result) = self.core.continuations.join_next(), if !self.core.continuations.is_empty() => {
                    self.handle_continuation(result);
                }

                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.core.network_quality_deadline();
                }
            }

            if self.core.disconnected {
                break;
            }
            self.core.flush();
        }

        info!(
            target: "room.actor",
            room_id = %self.room_id,
            "RoomActor stopped"
        );
    }

    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::ReceiveSnapshot { snapshot } => {
                self.handle_snapshot(&snapshot);
            }

            RoomMessage::AddTrackReceiver { receiver } => {
                let key = self.strategy.receiver_key(&receiver);
                let resolved = self.core.pending.resolve(key.clone(), receiver);
                debug!(
                    target: "room.actor",
                    key = %key,
                    resolved,
                    "Track receiver added"
                );
            }

            RoomMessage::AddLocalTrack { track, respond_to } => {
                self.core.local.add_track(track);
                let _ = respond_to.send(Ok(()));
            }

            RoomMessage::RemoveLocalTrack { id, respond_to } => {
                let _ = respond_to.send(self.core.local.remove_track(&id));
            }

            RoomMessage::SetLocalTrackEnabled {
                id,
                enabled,
                respond_to,
            } => {
                let _ = respond_to.send(self.core.local.set_track_enabled(&id, enabled));
            }

            RoomMessage::SetLocalTrackPriority {
                id,
                priority,
                respond_to,
            } => {
                let _ = respond_to.send(self.core.local.set_track_priority(&id, priority));
            }

            RoomMessage::SetBandwidthProfile { profile } => {
                self.core.local.set_bandwidth_profile(profile);
            }

            RoomMessage::PublishPeerConnectionState { state } => {
                let update = self.core.local.peer_connection_update(state);
                self.core.collaborators.transport.publish(update);
            }

            RoomMessage::SetTrackPriority {
                track,
                direction,
                priority,
                respond_to,
            } => {
                let result = self
                    .core
                    .channels
                    .track_priority
                    .with_protocol(|protocol, sender| {
                        protocol.send_track_priority_update(track, direction, priority, sender)
                    });
                let _ = respond_to.send(result);
            }

            RoomMessage::SetRenderHint { track, hint } => {
                self.core
                    .channels
                    .render_hints
                    .with_protocol(|protocol, sender| protocol.set_track_hint(track, hint, sender));
            }

            RoomMessage::ClearRenderHint { track } => {
                self.core
                    .channels
                    .render_hints
                    .protocol_mut()
                    .clear_track_hint(&track);
            }

            RoomMessage::SendTrackReplaced { track, respond_to } => {
                let result = self
                    .core
                    .channels
                    .publisher_hints
                    .with_protocol(|protocol, sender| match sender {
                        Some(sender) => Ok(protocol.send_track_replaced(track, sender)),
                        None => Err(RoomError::ChannelNotReady(
                            ChannelName::PublisherHints.to_string(),
                        )),
                    });
                let _ = respond_to.send(result);
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.core.state());
            }

            RoomMessage::Disconnect { error, respond_to } => {
                self.core.disconnect(error);
                let _ = respond_to.send(());
            }
        }
    }

    /// Reconcile a snapshot, in order: subscriptions, participants,
    /// subscription bindings, peer connections and recording, local
    /// publications, local identity, side-channels.
    fn handle_snapshot(&mut self, snapshot: &RoomSnapshot) {
        metrics::record_snapshot("applied");
        let core = &mut self.core;

        self.strategy.apply_subscribed(snapshot);

        let local = core
            .local
            .sid()
            .cloned()
            .or_else(|| snapshot.participant.as_ref().map(|p| p.sid.clone()));
        let changes = core.apply_participants(snapshot, local.as_ref(), self.strategy.as_ref());
        for (participant, track) in &changes.added {
            self.strategy.track_created(core, participant, track);
        }
        if snapshot.is_synced() {
            core.forget_unlisted_switch_off(snapshot);
        }

        self.strategy.reconcile(core);

        if let Some(peer_connections) = &snapshot.peer_connections {
            core.collaborators
                .peer_connections
                .update(peer_connections, snapshot.is_synced());
        }
        if let Some(recording) = snapshot.recording {
            core.recording.update(recording, &mut core.pending_events);
        }

        if let Some(published) = &snapshot.published {
            core.local.update_published(published, &mut core.pending_events);
        }

        if let Some(participant) = &snapshot.participant {
            core.local.connect(
                participant.sid.clone(),
                participant.identity.clone(),
                &mut core.pending_events,
            );
        }

        core.setup_channels(snapshot);
    }

    fn handle_signal(&mut self, signal: ChannelSignal) {
        match signal {
            ChannelSignal::Inbound {
                channel,
                generation,
                payload,
            } => {
                let message = match decode_message(&payload) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(
                            target: "room.actor",
                            channel = %channel,
                            error = %e,
                            "Failed to decode side-channel message"
                        );
                        return;
                    }
                };
                metrics::record_channel_message(channel.as_str());
                self.dispatch(channel, generation, message);
            }

            ChannelSignal::Closed {
                channel,
                generation,
            } => {
                let torn_down = self
                    .core
                    .channels
                    .control_mut(channel)
                    .is_some_and(|control| control.transport_closed(generation));
                if torn_down {
                    self.core
                        .pending_events
                        .push(RoomEvent::ChannelTeardown { channel });
                }
            }
        }
    }

    fn dispatch(&mut self, channel: ChannelName, generation: u64, message: ChannelMessage) {
        let core = &mut self.core;
        match channel {
            ChannelName::ActiveSpeaker => {
                let changes = core.channels.active_speaker.handle_message(generation, message);
                for DominantSpeakerChanged(participant) in changes {
                    core.dominant_speaker = participant.clone();
                    core.pending_events
                        .push(RoomEvent::DominantSpeakerChanged { participant });
                }
            }

            ChannelName::NetworkQuality => {
                let changes = core.channels.network_quality.handle_message(generation, message);
                for event in changes {
                    core.network_quality_changed(event);
                }
            }

            ChannelName::TrackPriority => {
                core.channels.track_priority.handle_message(generation, message);
            }

            ChannelName::RenderHints => {
                core.channels.render_hints.handle_message(generation, message);
            }

            ChannelName::PublisherHints => {
                let requests = core.channels.publisher_hints.handle_message(generation, message);
                for request in requests {
                    core.publisher_hints_requested(generation, request);
                }
            }

            ChannelName::TrackSwitchOff => {
                let updates = core.channels.track_switch_off.handle_message(generation, message);
                for update in updates {
                    core.apply_switch_off(update);
                }
            }

            ChannelName::TrackSubscriptions => {
                let updates = match core.channels.track_subscriptions.as_mut() {
                    Some(channel) => channel.handle_message(generation, message),
                    None => Vec::new(),
                };
                for update in updates {
                    self.strategy.subscriptions_updated(core, update);
                }
            }
        }
    }

    fn handle_continuation(&mut self, result: Result<Continuation, JoinError>) {
        let continuation = match result {
            Ok(continuation) => continuation,
            Err(e) => {
                if !e.is_cancelled() {
                    warn!(target: "room.actor", error = %e, "Room task failed");
                }
                return;
            }
        };

        let core = &mut self.core;
        match continuation {
            Continuation::TrackReceiver {
                participant,
                track,
                key,
                receiver,
            } => {
                if let Some(receiver) = receiver {
                    core.attach_receiver(&participant, &track, &key, receiver);
                }
            }

            Continuation::ChannelReceiver {
                channel,
                generation,
                receiver,
            } => {
                if let Some(receiver) = receiver {
                    core.bind_channel(channel, generation, &receiver);
                }
            }

            Continuation::NetworkQualityInputs(inputs) => {
                let now = Instant::now();
                core.channels
                    .network_quality
                    .with_protocol(|protocol, sender| protocol.inputs_taken(inputs, sender, now));
            }

            Continuation::PublisherHintResults {
                generation,
                id,
                outcomes,
            } => {
                let sent = core
                    .channels
                    .publisher_hints
                    .with_bound(generation, |protocol, sender| {
                        protocol.send_response(id, outcomes, sender);
                    });
                if sent.is_none() {
                    debug!(
                        target: "room.actor",
                        id,
                        "Publisher hints channel changed, dropping results"
                    );
                }
            }
        }
    }
}

//! Remote track publications.
//!
//! A publication tracks what the server says about one remote track
//! (name, kind, priority, enabled flag, switch-off state) together with
//! the local subscription: the receiver it is bound to and any terminal
//! subscription error.

use super::lifecycle::{TrackLifecycle, TrackState};
use crate::actors::messages::{RoomEvent, TrackInfo};
use crate::observability::metrics;
use crate::pending::ReceiverKey;
use crate::receiver::TrackReceiver;
use common::error::ServerError;
use common::types::{ParticipantSid, TrackKind, TrackSid};
use media_protocol::message::SwitchOffReason;
use media_protocol::snapshot::{RemoteTrackDescriptor, TrackPriority};
use tracing::{debug, warn};

/// Receiver binding of a publication.
#[derive(Debug, Clone, Default)]
pub enum Binding {
    #[default]
    Detached,
    /// Waiting for a receiver with this key.
    Pending(ReceiverKey),
    Attached(TrackReceiver),
}

/// Where the enabled flag of a publication comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnabledSource {
    /// The participant descriptor's `enabled` field.
    Descriptor,
    /// Derived from switch-off state: disabled only when switched off by
    /// the publisher.
    SwitchOff,
}

/// Switch-off state of a remote track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchOffState {
    pub off: bool,
    /// Only kept while switched off.
    pub reason: Option<SwitchOffReason>,
}

impl SwitchOffState {
    #[must_use]
    pub fn on() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn off(reason: Option<SwitchOffReason>) -> Self {
        Self { off: true, reason }
    }

    fn publisher_disabled(&self) -> bool {
        self.off && self.reason == Some(SwitchOffReason::DisabledByPublisher)
    }
}

#[derive(Debug)]
pub struct RemoteTrackPublication {
    participant: ParticipantSid,
    sid: TrackSid,
    kind: TrackKind,
    name: String,
    priority: TrackPriority,
    lifecycle: TrackLifecycle,
    switch_off: SwitchOffState,
    error: Option<ServerError>,
    subscribed: bool,
    binding: Binding,
    enabled_source: EnabledSource,
}

impl RemoteTrackPublication {
    pub fn new(
        participant: ParticipantSid,
        descriptor: &RemoteTrackDescriptor,
        switch_off: SwitchOffState,
        enabled_source: EnabledSource,
    ) -> Self {
        let enabled = match enabled_source {
            EnabledSource::Descriptor => descriptor.enabled,
            EnabledSource::SwitchOff => !switch_off.publisher_disabled(),
        };
        Self {
            participant,
            sid: descriptor.sid.clone(),
            kind: descriptor.kind,
            name: descriptor.name.clone(),
            priority: descriptor.priority.unwrap_or_default(),
            lifecycle: TrackLifecycle::new(enabled),
            switch_off,
            error: None,
            subscribed: false,
            binding: Binding::Detached,
            enabled_source,
        }
    }

    pub fn sid(&self) -> &TrackSid {
        &self.sid
    }

    pub fn participant(&self) -> &ParticipantSid {
        &self.participant
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.lifecycle.is_enabled()
    }

    pub fn is_ended(&self) -> bool {
        self.lifecycle.is_ended()
    }

    pub fn switch_off(&self) -> &SwitchOffState {
        &self.switch_off
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn error(&self) -> Option<&ServerError> {
        self.error.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Key this publication is waiting on.
    pub fn pending_key(&self) -> Option<&ReceiverKey> {
        match &self.binding {
            Binding::Pending(key) => Some(key),
            _ => None,
        }
    }

    pub fn attached(&self) -> Option<&TrackReceiver> {
        match &self.binding {
            Binding::Attached(receiver) => Some(receiver),
            _ => None,
        }
    }

    /// Apply a newer descriptor.
    pub fn update(&mut self, descriptor: &RemoteTrackDescriptor, events: &mut Vec<RoomEvent>) {
        let priority = descriptor.priority.unwrap_or_default();
        if priority != self.priority {
            self.priority = priority;
            events.push(RoomEvent::TrackPriorityChanged {
                participant: self.participant.clone(),
                track: self.sid.clone(),
                priority,
            });
        }

        if self.enabled_source == EnabledSource::Descriptor {
            self.set_enabled(descriptor.enabled, events);
        }
    }

    /// Record the server's switch-off state for this track.
    pub fn set_switched_off(
        &mut self,
        off: bool,
        reason: Option<SwitchOffReason>,
        events: &mut Vec<RoomEvent>,
    ) {
        let next = SwitchOffState {
            off,
            reason: if off { reason } else { None },
        };
        if next == self.switch_off {
            return;
        }
        self.switch_off = next;
        events.push(RoomEvent::TrackSwitchedOff {
            participant: self.participant.clone(),
            track: self.sid.clone(),
            switched_off: self.switch_off.off,
            reason: self.switch_off.reason.clone(),
        });

        if self.enabled_source == EnabledSource::SwitchOff {
            let enabled = !self.switch_off.publisher_disabled();
            self.set_enabled(enabled, events);
        }
    }

    fn set_enabled(&mut self, enabled: bool, events: &mut Vec<RoomEvent>) {
        if let Some(state) = self.lifecycle.enable(enabled) {
            events.push(RoomEvent::TrackStateChanged {
                participant: self.participant.clone(),
                track: self.sid.clone(),
                state,
            });
        }
    }

    /// Fail the subscription. Only the first failure is recorded; a failed
    /// publication is never subscribed again. Returns whether this call
    /// recorded the failure.
    pub fn subscription_failed(&mut self, error: ServerError, events: &mut Vec<RoomEvent>) -> bool {
        if self.error.is_some() {
            return false;
        }
        warn!(
            target: "room.registry",
            participant = %self.participant,
            track = %self.sid,
            code = error.code,
            "Track subscription failed"
        );
        metrics::record_subscription_failure();
        self.detach(false, events);
        self.error = Some(error.clone());
        events.push(RoomEvent::TrackSubscriptionFailed {
            participant: self.participant.clone(),
            track: self.sid.clone(),
            error,
        });
        true
    }

    /// Start waiting for a receiver. Returns `false` if the publication
    /// can no longer be subscribed.
    pub fn set_pending(&mut self, key: ReceiverKey) -> bool {
        if self.is_failed() || self.is_ended() {
            return false;
        }
        self.binding = Binding::Pending(key);
        true
    }

    /// Bind `receiver`. Returns `false` if the publication can no longer be
    /// subscribed.
    pub fn attach(&mut self, receiver: TrackReceiver, events: &mut Vec<RoomEvent>) -> bool {
        if self.is_failed() || self.is_ended() {
            debug!(
                target: "room.registry",
                track = %self.sid,
                "Not attaching receiver to failed or ended track"
            );
            return false;
        }
        let receiver_id = receiver.id().to_string();
        self.binding = Binding::Attached(receiver);
        self.subscribed = true;
        events.push(RoomEvent::TrackSubscribed {
            participant: self.participant.clone(),
            track: self.sid.clone(),
            receiver_id,
        });
        true
    }

    /// Drop any receiver binding. `still_subscribed` keeps an existing
    /// subscription (the server still considers the track subscribed, e.g.
    /// while switched off); it never marks an unbound track subscribed.
    pub fn detach(&mut self, still_subscribed: bool, events: &mut Vec<RoomEvent>) {
        self.binding = Binding::Detached;
        let was_subscribed = self.subscribed;
        self.subscribed = was_subscribed && still_subscribed;
        if was_subscribed && !still_subscribed {
            events.push(RoomEvent::TrackUnsubscribed {
                participant: self.participant.clone(),
                track: self.sid.clone(),
            });
        }
    }

    /// End the track and unsubscribe. Emits `TrackRemoved`.
    pub fn remove(&mut self, events: &mut Vec<RoomEvent>) {
        self.lifecycle.end();
        self.detach(false, events);
        events.push(RoomEvent::TrackRemoved {
            participant: self.participant.clone(),
            track: self.sid.clone(),
        });
    }

    pub fn state(&self) -> TrackState {
        self.lifecycle.state()
    }

    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            sid: self.sid.clone(),
            kind: self.kind,
            name: self.name.clone(),
            priority: self.priority,
            state: self.lifecycle.state(),
            switched_off: self.switch_off.off,
            switch_off_reason: self.switch_off.reason.clone(),
            subscribed: self.subscribed,
            receiver_id: self.attached().map(|r| r.id().to_string()),
            error: self.error.clone(),
        }
    }
}

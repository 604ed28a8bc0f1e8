//! Media side-channels.
//!
//! Each side-channel is carried over a data channel announced in the room
//! snapshot's `media_signaling` section. [`MediaSignaling`] owns the
//! channel-agnostic part: resolving the data receiver, binding its
//! transport, and tearing down when the transport closes. The protocol on
//! top is plugged in through [`MediaSignalingProtocol`].
//!
//! # Generations
//!
//! Every `setup` bumps the channel's generation. Receiver resolutions,
//! inbound messages and close notifications carry the generation they were
//! issued for; anything tagged with an older generation is ignored.
//!
//! ```text
//!            setup(label)                 bind(gen, data receiver)
//!   Idle ─────────────────> Resolving ───────────────────────────> Bound
//!    ^                         │  bind(gen, media receiver)          │
//!    │                         └──> (inert, logged)                  │
//!    └──────────────────── teardown / transport closed <─────────────┘
//! ```

pub mod dominant_speaker;
pub mod network_quality;
pub mod publisher_hints;
pub mod render_hints;
pub mod track_priority;
pub mod track_subscriptions;
pub mod track_switch_off;

use crate::receiver::{ChannelSender, TrackReceiver};
use bytes::Bytes;
use media_protocol::message::ChannelMessage;
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name of a side-channel, as used in `media_signaling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelName {
    ActiveSpeaker,
    NetworkQuality,
    TrackPriority,
    RenderHints,
    PublisherHints,
    TrackSwitchOff,
    /// Protocol v3 only
    TrackSubscriptions,
}

impl ChannelName {
    /// Channels every protocol version sets up.
    pub const COMMON: [ChannelName; 6] = [
        ChannelName::ActiveSpeaker,
        ChannelName::NetworkQuality,
        ChannelName::TrackPriority,
        ChannelName::RenderHints,
        ChannelName::PublisherHints,
        ChannelName::TrackSwitchOff,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelName::ActiveSpeaker => "active_speaker",
            ChannelName::NetworkQuality => "network_quality",
            ChannelName::TrackPriority => "track_priority",
            ChannelName::RenderHints => "render_hints",
            ChannelName::PublisherHints => "publisher_hints",
            ChannelName::TrackSwitchOff => "track_switch_off",
            ChannelName::TrackSubscriptions => "track_subscriptions",
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol spoken over one side-channel.
pub trait MediaSignalingProtocol {
    /// What the protocol reports back to the room.
    type Event;

    const CHANNEL: ChannelName;

    /// The transport was bound. Re-synchronize any local cache.
    fn on_ready(&mut self, _sender: &ChannelSender) {}

    /// A message arrived on the bound transport.
    fn on_message(&mut self, message: ChannelMessage, sender: &ChannelSender) -> Vec<Self::Event>;

    /// The transport went away.
    fn on_teardown(&mut self) {}
}

/// Result of offering a resolved receiver to a channel.
#[derive(Debug)]
pub enum BindOutcome {
    /// The receiver was resolved for an older setup.
    Stale,
    /// The receiver carries no data transport; the channel stays inert.
    Mismatch,
    /// The channel is ready. The room must pump the transport.
    Bound(ChannelPump),
}

/// Inbound half of a bound transport, to be driven by [`spawn_pump`].
#[derive(Debug)]
pub struct ChannelPump {
    pub channel: ChannelName,
    pub generation: u64,
    inbound: mpsc::UnboundedReceiver<Bytes>,
    closed: CancellationToken,
    cancel: CancellationToken,
}

/// Notification from a pump task to the room.
#[derive(Debug)]
pub enum ChannelSignal {
    Inbound {
        channel: ChannelName,
        generation: u64,
        payload: Bytes,
    },
    Closed {
        channel: ChannelName,
        generation: u64,
    },
}

/// Forward everything arriving on a bound transport to the room until the
/// transport closes or the channel is torn down.
pub fn spawn_pump(pump: ChannelPump, signals: mpsc::UnboundedSender<ChannelSignal>) -> JoinHandle<()> {
    let ChannelPump {
        channel,
        generation,
        mut inbound,
        closed,
        cancel,
    } = pump;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => return,

                payload = inbound.recv() => match payload {
                    Some(payload) => {
                        let signal = ChannelSignal::Inbound { channel, generation, payload };
                        if signals.send(signal).is_err() {
                            return;
                        }
                    }
                    None => break,
                },

                () = closed.cancelled() => break,
            }
        }
        // The inbound stream ending means the receiver is gone for good.
        closed.cancel();
        let _ = signals.send(ChannelSignal::Closed {
            channel,
            generation,
        });
    })
}

#[derive(Debug)]
enum ChannelState {
    Idle,
    Resolving {
        label: String,
    },
    /// Setup resolved to a receiver without a data transport.
    Inert {
        label: String,
    },
    Bound {
        label: String,
        sender: ChannelSender,
        cancel: CancellationToken,
    },
}

/// Channel-agnostic side-channel control.
///
/// Object-safe so the room can drive every channel uniformly.
pub trait ChannelControl {
    fn channel(&self) -> ChannelName;

    /// Current generation.
    fn generation(&self) -> u64;

    /// Tear down any bound transport and start resolving `label`.
    /// Returns the new generation.
    fn setup(&mut self, label: String) -> u64;

    /// Offer the receiver resolved for `generation`.
    fn bind(&mut self, generation: u64, receiver: &TrackReceiver) -> BindOutcome;

    /// The transport bound at `generation` closed. Returns whether the
    /// channel was torn down.
    fn transport_closed(&mut self, generation: u64) -> bool;

    /// Tear down. Returns whether a transport was bound.
    fn teardown(&mut self) -> bool;

    /// Whether a setup is in progress or bound.
    fn is_setup(&self) -> bool;

    /// Whether a transport is bound.
    fn is_ready(&self) -> bool;

    /// Label of the data channel being resolved or bound.
    fn label(&self) -> Option<&str>;
}

/// A side-channel running protocol `P`.
#[derive(Debug)]
pub struct MediaSignaling<P> {
    protocol: P,
    generation: u64,
    state: ChannelState,
}

impl<P: MediaSignalingProtocol> MediaSignaling<P> {
    pub fn new(protocol: P) -> Self {
        Self {
            protocol,
            generation: 0,
            state: ChannelState::Idle,
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    /// Bound sender, if ready.
    pub fn sender(&self) -> Option<&ChannelSender> {
        match &self.state {
            ChannelState::Bound { sender, .. } => Some(sender),
            _ => None,
        }
    }

    /// Run `f` with the protocol and the bound sender, if any.
    pub fn with_protocol<R>(&mut self, f: impl FnOnce(&mut P, Option<&ChannelSender>) -> R) -> R {
        let sender = match &self.state {
            ChannelState::Bound { sender, .. } => Some(sender),
            _ => None,
        };
        f(&mut self.protocol, sender)
    }

    /// Run `f` only if the channel is still bound at `generation`.
    pub fn with_bound<R>(
        &mut self,
        generation: u64,
        f: impl FnOnce(&mut P, &ChannelSender) -> R,
    ) -> Option<R> {
        if generation != self.generation {
            return None;
        }
        match &self.state {
            ChannelState::Bound { sender, .. } => Some(f(&mut self.protocol, sender)),
            _ => None,
        }
    }

    /// Deliver an inbound message sent at `generation`.
    pub fn handle_message(&mut self, generation: u64, message: ChannelMessage) -> Vec<P::Event> {
        if generation != self.generation {
            debug!(
                target: "room.signaling",
                channel = %P::CHANNEL,
                generation,
                current = self.generation,
                "Dropping message from previous transport"
            );
            return Vec::new();
        }

        if message == ChannelMessage::Unknown {
            warn!(
                target: "room.signaling",
                channel = %P::CHANNEL,
                "Unknown message type"
            );
            return Vec::new();
        }

        match &self.state {
            ChannelState::Bound { sender, .. } => self.protocol.on_message(message, sender),
            _ => Vec::new(),
        }
    }
}

impl<P: MediaSignalingProtocol> ChannelControl for MediaSignaling<P> {
    fn channel(&self) -> ChannelName {
        P::CHANNEL
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn setup(&mut self, label: String) -> u64 {
        self.teardown();
        self.generation += 1;
        debug!(
            target: "room.signaling",
            channel = %P::CHANNEL,
            generation = self.generation,
            label = %label,
            "Setting up side-channel"
        );
        self.state = ChannelState::Resolving { label };
        self.generation
    }

    fn bind(&mut self, generation: u64, receiver: &TrackReceiver) -> BindOutcome {
        if generation != self.generation {
            return BindOutcome::Stale;
        }
        let label = match &self.state {
            ChannelState::Resolving { label } => label.clone(),
            _ => return BindOutcome::Stale,
        };

        let transport = receiver
            .sender()
            .zip(receiver.take_inbound());
        let Some((sender, inbound)) = transport else {
            error!(
                target: "room.signaling",
                channel = %P::CHANNEL,
                receiver_id = %receiver.id(),
                "Side-channel resolved to a receiver without a data transport"
            );
            self.state = ChannelState::Inert { label };
            return BindOutcome::Mismatch;
        };

        let cancel = CancellationToken::new();
        self.protocol.on_ready(&sender);
        self.state = ChannelState::Bound {
            label,
            sender,
            cancel: cancel.clone(),
        };

        info!(
            target: "room.signaling",
            channel = %P::CHANNEL,
            generation,
            "Side-channel ready"
        );

        BindOutcome::Bound(ChannelPump {
            channel: P::CHANNEL,
            generation,
            inbound,
            closed: receiver.close_signal(),
            cancel,
        })
    }

    fn transport_closed(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.teardown()
    }

    fn teardown(&mut self) -> bool {
        let state = std::mem::replace(&mut self.state, ChannelState::Idle);
        match state {
            ChannelState::Bound { cancel, .. } => {
                cancel.cancel();
                self.protocol.on_teardown();
                info!(
                    target: "room.signaling",
                    channel = %P::CHANNEL,
                    generation = self.generation,
                    "Side-channel torn down"
                );
                true
            }
            _ => false,
        }
    }

    fn is_setup(&self) -> bool {
        !matches!(self.state, ChannelState::Idle)
    }

    fn is_ready(&self) -> bool {
        matches!(self.state, ChannelState::Bound { .. })
    }

    fn label(&self) -> Option<&str> {
        match &self.state {
            ChannelState::Idle => None,
            ChannelState::Resolving { label }
            | ChannelState::Inert { label }
            | ChannelState::Bound { label, .. } => Some(label),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::receiver::DataTransport;
    use common::types::TrackKind;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Echo {
        ready: usize,
        torn_down: usize,
        seen: Vec<&'static str>,
    }

    impl MediaSignalingProtocol for Echo {
        type Event = &'static str;
        const CHANNEL: ChannelName = ChannelName::ActiveSpeaker;

        fn on_ready(&mut self, _sender: &ChannelSender) {
            self.ready += 1;
        }

        fn on_message(&mut self, message: ChannelMessage, _sender: &ChannelSender) -> Vec<&'static str> {
            self.seen.push(message.type_name());
            vec![message.type_name()]
        }

        fn on_teardown(&mut self) {
            self.torn_down += 1;
        }
    }

    fn bound(outcome: BindOutcome) -> ChannelPump {
        match outcome {
            BindOutcome::Bound(pump) => Some(pump),
            _ => None,
        }
        .expect("data receiver binds")
    }

    fn speaker() -> ChannelMessage {
        ChannelMessage::ActiveSpeaker { participant: None }
    }

    #[test]
    fn test_setup_bumps_generation() {
        let mut channel = MediaSignaling::new(Echo::default());
        assert!(!channel.is_setup());
        assert_eq!(channel.setup("ds".to_string()), 1);
        assert!(channel.is_setup());
        assert!(!channel.is_ready());
        assert_eq!(channel.label(), Some("ds"));
        assert_eq!(channel.setup("ds".to_string()), 2);
    }

    #[tokio::test]
    async fn test_bind_data_receiver() {
        let mut channel = MediaSignaling::new(Echo::default());
        let generation = channel.setup("ds".to_string());
        let (transport, _peer) = DataTransport::channel();
        let receiver = TrackReceiver::data("ds", transport);

        let outcome = channel.bind(generation, &receiver);
        assert!(matches!(outcome, BindOutcome::Bound(_)));
        assert!(channel.is_ready());
        assert_eq!(channel.protocol().ready, 1);

        assert_eq!(channel.handle_message(generation, speaker()), vec!["active_speaker"]);
    }

    #[test]
    fn test_stale_resolution_is_ignored() {
        let mut channel = MediaSignaling::new(Echo::default());
        let first = channel.setup("ds".to_string());
        let _second = channel.setup("ds".to_string());
        let (transport, _peer) = DataTransport::channel();
        let receiver = TrackReceiver::data("ds", transport);

        assert!(matches!(channel.bind(first, &receiver), BindOutcome::Stale));
        assert!(!channel.is_ready());
        assert_eq!(channel.protocol().ready, 0);
    }

    #[test]
    fn test_media_receiver_leaves_channel_inert() {
        let mut channel = MediaSignaling::new(Echo::default());
        let generation = channel.setup("ds".to_string());
        let receiver = TrackReceiver::media("ds", TrackKind::Audio, None);

        assert!(matches!(channel.bind(generation, &receiver), BindOutcome::Mismatch));
        assert!(channel.is_setup());
        assert!(!channel.is_ready());
        assert!(channel.handle_message(generation, speaker()).is_empty());
    }

    #[test]
    fn test_close_tears_down_current_generation_only() {
        let mut channel = MediaSignaling::new(Echo::default());
        let generation = channel.setup("ds".to_string());
        let (transport, _peer) = DataTransport::channel();
        let receiver = TrackReceiver::data("ds", transport);
        let _ = channel.bind(generation, &receiver);

        assert!(!channel.transport_closed(generation + 1));
        assert!(channel.is_ready());

        assert!(channel.transport_closed(generation));
        assert!(!channel.is_setup());
        assert_eq!(channel.protocol().torn_down, 1);
        assert!(channel.handle_message(generation, speaker()).is_empty());
    }

    #[test]
    fn test_unknown_messages_are_not_delivered() {
        let mut channel = MediaSignaling::new(Echo::default());
        let generation = channel.setup("ds".to_string());
        let (transport, _peer) = DataTransport::channel();
        let _ = channel.bind(generation, &TrackReceiver::data("ds", transport));

        assert!(channel
            .handle_message(generation, ChannelMessage::Unknown)
            .is_empty());
        assert!(channel.protocol().seen.is_empty());
    }

    #[tokio::test]
    async fn test_pump_forwards_messages_then_close() {
        let mut channel = MediaSignaling::new(Echo::default());
        let generation = channel.setup("ds".to_string());
        let (transport, peer) = DataTransport::channel();
        let receiver = TrackReceiver::data("ds", transport);
        let pump = bound(channel.bind(generation, &receiver));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = spawn_pump(pump, tx);

        peer.deliver.send(Bytes::from_static(b"{}")).unwrap();
        let signal = rx.recv().await.unwrap();
        assert!(matches!(
            signal,
            ChannelSignal::Inbound { channel: ChannelName::ActiveSpeaker, generation: 1, .. }
        ));

        receiver.close();
        let signal = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(signal, ChannelSignal::Closed { generation: 1, .. }));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_stops_pump_silently() {
        let mut channel = MediaSignaling::new(Echo::default());
        let generation = channel.setup("ds".to_string());
        let (transport, _peer) = DataTransport::channel();
        let receiver = TrackReceiver::data("ds", transport);
        let pump = bound(channel.bind(generation, &receiver));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = spawn_pump(pump, tx);
        assert!(channel.teardown());
        task.await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}

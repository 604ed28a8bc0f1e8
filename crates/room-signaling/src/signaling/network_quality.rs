//! `network_quality` side-channel.
//!
//! The room runs a send cycle for the whole life of the room, bound or
//! not:
//!
//! 1. clear the resend timer and take the next inputs from the shared
//!    [`AsyncVar`] (one take outstanding at a time);
//! 2. publish them if a transport is bound, otherwise drop them;
//! 3. arm the resend timer at the current delay.
//!
//! When the resend timer fires the delay grows by [`BACKOFF_FACTOR`] and a
//! new cycle starts. Any response from the server resets the delay and, if
//! the resend timer is armed, schedules one catch-up cycle shortly after.
//!
//! Timers are plain deadlines; the room actor sleeps until
//! [`NetworkQualitySignaling::next_deadline`].

use super::{ChannelName, MediaSignalingProtocol};
use crate::async_var::AsyncVar;
use crate::config::NetworkQualityConfig;
use crate::observability::metrics;
use crate::receiver::ChannelSender;
use common::types::ParticipantSid;
use media_protocol::message::{
    ChannelMessage, LocalNetworkQuality, NetworkQualityInputs, NetworkQualityLevels,
    OutboundMessage,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Multiplier applied to the resend delay each time the server fails to
/// respond in time.
pub const BACKOFF_FACTOR: f64 = 1.5;

/// A participant's network quality level changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkQualityEvent {
    Local {
        level: u8,
        levels: Option<NetworkQualityLevels>,
    },
    Remote {
        participant: ParticipantSid,
        level: Option<u8>,
        levels: NetworkQualityLevels,
    },
}

#[derive(Debug)]
pub struct NetworkQualitySignaling {
    config: NetworkQualityConfig,
    inputs: Arc<AsyncVar<NetworkQualityInputs>>,
    level: Option<u8>,
    levels: Option<NetworkQualityLevels>,
    remotes: HashMap<ParticipantSid, NetworkQualityLevels>,
    delay: Duration,
    resend_at: Option<Instant>,
    catch_up_at: Option<Instant>,
    take_outstanding: bool,
}

impl NetworkQualitySignaling {
    pub fn new(config: NetworkQualityConfig, inputs: Arc<AsyncVar<NetworkQualityInputs>>) -> Self {
        Self {
            delay: config.response_timeout,
            config,
            inputs,
            level: None,
            levels: None,
            remotes: HashMap::new(),
            resend_at: None,
            catch_up_at: None,
            take_outstanding: false,
        }
    }

    /// Local network quality level.
    #[must_use]
    pub fn level(&self) -> Option<u8> {
        self.level
    }

    /// Decomposed local levels, when the server sent them.
    #[must_use]
    pub fn levels(&self) -> Option<NetworkQualityLevels> {
        self.levels
    }

    #[must_use]
    pub fn remote_level(&self, participant: &ParticipantSid) -> Option<u8> {
        self.remotes
            .get(participant)
            .and_then(NetworkQualityLevels::effective_level)
    }

    /// Current resend delay.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    #[must_use]
    pub fn is_taking(&self) -> bool {
        self.take_outstanding
    }

    /// Begin a send cycle. Returns the pending take, or `None` if one is
    /// already outstanding.
    pub fn start_cycle(
        &mut self,
    ) -> Option<impl Future<Output = Option<NetworkQualityInputs>> + Send + 'static> {
        self.resend_at = None;
        if self.take_outstanding {
            return None;
        }
        self.take_outstanding = true;
        Some(self.inputs.take())
    }

    /// Finish a send cycle with the inputs that were taken.
    pub fn inputs_taken(
        &mut self,
        inputs: Option<NetworkQualityInputs>,
        sender: Option<&ChannelSender>,
        now: Instant,
    ) {
        self.take_outstanding = false;
        let Some(inputs) = inputs else {
            return;
        };

        match sender {
            Some(sender) => {
                sender.publish(&OutboundMessage::NetworkQuality {
                    inputs,
                    report_level: self.config.local_verbosity,
                    remote_report_level: self.config.remote_verbosity,
                });
            }
            None => debug!(
                target: "room.signaling.network_quality",
                "Not bound, dropping network quality inputs"
            ),
        }

        self.resend_at = Some(now + self.delay);
    }

    /// Earliest pending timer.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.resend_at, self.catch_up_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire every timer due at `now`. Returns whether a new send cycle
    /// should start.
    pub fn on_deadline(&mut self, now: Instant) -> bool {
        let mut start = false;

        if self.resend_at.is_some_and(|at| at <= now) {
            self.resend_at = None;
            self.delay = self.delay.mul_f64(BACKOFF_FACTOR);
            metrics::record_network_quality_resend();
            debug!(
                target: "room.signaling.network_quality",
                delay_ms = self.delay.as_millis(),
                "No network quality response, resending"
            );
            start = true;
        }

        if self.catch_up_at.is_some_and(|at| at <= now) {
            self.catch_up_at = None;
            start = true;
        }

        start
    }

    fn apply_report(
        &mut self,
        local: Option<LocalNetworkQuality>,
        remotes: Vec<media_protocol::message::RemoteNetworkQuality>,
    ) -> Vec<NetworkQualityEvent> {
        let mut events = Vec::new();

        let level = match local {
            Some(LocalNetworkQuality::Level(level)) => {
                self.levels = None;
                Some(level)
            }
            Some(LocalNetworkQuality::Levels(levels)) => {
                self.levels = Some(levels);
                levels.effective_level()
            }
            None => None,
        };
        if let Some(level) = level {
            if self.level != Some(level) {
                self.level = Some(level);
                events.push(NetworkQualityEvent::Local {
                    level,
                    levels: self.levels,
                });
            }
        }

        let previous = std::mem::take(&mut self.remotes);
        for remote in remotes {
            let level = remote.levels.effective_level();
            let known = previous.get(&remote.sid).map(NetworkQualityLevels::effective_level);
            if known != Some(level) {
                events.push(NetworkQualityEvent::Remote {
                    participant: remote.sid.clone(),
                    level,
                    levels: remote.levels,
                });
            }
            self.remotes.insert(remote.sid, remote.levels);
        }

        events
    }
}

impl MediaSignalingProtocol for NetworkQualitySignaling {
    type Event = NetworkQualityEvent;
    const CHANNEL: ChannelName = ChannelName::NetworkQuality;

    fn on_message(&mut self, message: ChannelMessage, _sender: &ChannelSender) -> Vec<Self::Event> {
        let ChannelMessage::NetworkQuality(report) = message else {
            debug!(
                target: "room.signaling.network_quality",
                "Ignoring message"
            );
            return Vec::new();
        };

        let events = self.apply_report(report.local, report.remotes);

        self.delay = self.config.response_timeout;
        if self.resend_at.is_some() && self.catch_up_at.is_none() {
            self.catch_up_at = Some(Instant::now() + self.config.catch_up_delay);
        }

        events
    }
}

//! Track lifecycle state machine.
//!
//! ```text
//! Enabled <──> Disabled
//!    │            │
//!    └──> Ended <─┘   (terminal)
//! ```

use serde::Serialize;
use std::fmt;

/// Lifecycle state of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Enabled,
    Disabled,
    Ended,
}

impl TrackState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackState::Enabled => "enabled",
            TrackState::Disabled => "disabled",
            TrackState::Ended => "ended",
        }
    }
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one track.
///
/// Every operation is idempotent and returns the new state only when the
/// state actually changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackLifecycle {
    state: TrackState,
}

impl TrackLifecycle {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            state: if enabled {
                TrackState::Enabled
            } else {
                TrackState::Disabled
            },
        }
    }

    #[must_use]
    pub fn state(&self) -> TrackState {
        self.state
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state == TrackState::Enabled
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.state == TrackState::Ended
    }

    pub fn enable(&mut self, enabled: bool) -> Option<TrackState> {
        let next = if enabled {
            TrackState::Enabled
        } else {
            TrackState::Disabled
        };
        self.transition(next)
    }

    pub fn disable(&mut self) -> Option<TrackState> {
        self.enable(false)
    }

    pub fn end(&mut self) -> Option<TrackState> {
        self.transition(TrackState::Ended)
    }

    fn transition(&mut self, next: TrackState) -> Option<TrackState> {
        if self.state == TrackState::Ended || self.state == next {
            return None;
        }
        self.state = next;
        Some(next)
    }
}

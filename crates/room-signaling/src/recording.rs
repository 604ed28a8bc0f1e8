//! Room recording state.

use crate::actors::messages::RoomEvent;
use media_protocol::snapshot::RecordingState;
use tracing::info;

#[derive(Debug, Default)]
pub struct Recording {
    revision: Option<u64>,
    is_recording: Option<bool>,
}

impl Recording {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until the server reports recording state.
    #[must_use]
    pub fn is_recording(&self) -> Option<bool> {
        self.is_recording
    }

    /// Apply a newer recording state. Emits `RecordingChanged` when the
    /// flag flips.
    pub fn update(&mut self, state: RecordingState, events: &mut Vec<RoomEvent>) {
        if self.revision.is_some_and(|last| state.revision <= last) {
            return;
        }
        self.revision = Some(state.revision);

        if self.is_recording != Some(state.is_recording) {
            info!(
                target: "room.registry",
                is_recording = state.is_recording,
                "Recording state changed"
            );
            self.is_recording = Some(state.is_recording);
            events.push(RoomEvent::RecordingChanged {
                is_recording: state.is_recording,
            });
        }
    }
}

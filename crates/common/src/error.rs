//! Common error types for the room signaling crates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error code the server uses when the local participant disconnects
/// before a publication completes.
pub const PARTICIPANT_DISCONNECTED_CODE: u32 = 53_001;

/// Structured error reported by the signaling server.
///
/// Appears on the wire as `{"code": 53204, "message": "..."}` inside
/// subscription failures, publish failures and v3 subscription errors.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("server error {code}: {message}")]
pub struct ServerError {
    /// Numeric error code
    pub code: u32,
    /// Human-readable description
    #[serde(default)]
    pub message: String,
}

impl ServerError {
    /// Create a new server error
    #[must_use]
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error attached to local tracks when the session goes away
    #[must_use]
    pub fn participant_disconnected() -> Self {
        Self::new(
            PARTICIPANT_DISCONNECTED_CODE,
            "LocalParticipant disconnected",
        )
    }
}

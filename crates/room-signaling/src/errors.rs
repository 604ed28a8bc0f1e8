//! Room signaling error types.
//!
//! Errors returned through [`crate::actors::RoomHandle`]. Stale snapshots,
//! transport mismatches and resend timeouts never surface here; they are
//! handled inside the room actor and only logged.

use crate::config::ConfigError;
use media_protocol::codec::CodecError;
use thiserror::Error;

/// Room signaling error type.
///
/// Maps to client error codes:
/// - `Unsupported`: `FORBIDDEN` (3)
/// - `TrackNotFound`: `NOT_FOUND` (4)
/// - `Disconnected`, `ChannelNotReady`: `UNAVAILABLE` (7)
/// - Internal, Codec, Config: `INTERNAL_ERROR` (6)
#[derive(Debug, Error)]
pub enum RoomError {
    /// Actor communication failed.
    #[error("Internal error: {0}")]
    Internal(String),

    /// The operation is not supported by the protocol.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// No local track with the given id.
    #[error("Track not found: {0}")]
    TrackNotFound(String),

    /// The room has disconnected.
    #[error("Room is disconnected")]
    Disconnected,

    /// The named side-channel has no bound transport.
    #[error("Side-channel not ready: {0}")]
    ChannelNotReady(String),

    /// A wire document could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RoomError {
    /// Returns the client error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            RoomError::Internal(_) | RoomError::Codec(_) | RoomError::Config(_) => 6,
            RoomError::Unsupported(_) => 3,
            RoomError::TrackNotFound(_) => 4,
            RoomError::Disconnected | RoomError::ChannelNotReady(_) => 7,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RoomError::Internal(_) | RoomError::Codec(_) | RoomError::Config(_) => {
                "An internal error occurred".to_string()
            }
            RoomError::Unsupported(msg) => msg.clone(),
            RoomError::TrackNotFound(_) => "Track not found".to_string(),
            RoomError::Disconnected => "Room is disconnected".to_string(),
            RoomError::ChannelNotReady(_) => "Side-channel is not ready".to_string(),
        }
    }
}

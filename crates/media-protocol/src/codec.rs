//! Codec for encoding and decoding signaling documents.
//!
//! Everything on the signaling transport and on side-channels is a UTF-8
//! JSON document. Decoding never panics on malformed input; it returns a
//! [`CodecError`] instead.

use crate::message::{ChannelMessage, OutboundMessage};
use crate::snapshot::{LocalStateUpdate, RoomSnapshot};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Input was empty
    #[error("Insufficient data")]
    InsufficientData,

    /// Input was not valid JSON, or did not match the expected shape
    #[error("Invalid document: {0}")]
    InvalidFormat(String),

    /// A document could not be serialized
    #[error("Encoding failed: {0}")]
    Encode(String),
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    if data.is_empty() {
        return Err(CodecError::InsufficientData);
    }
    serde_json::from_slice(data).map_err(|e| CodecError::InvalidFormat(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes, CodecError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a room snapshot received on the signaling transport
///
/// # Errors
///
/// Returns an error if the input is empty or not a snapshot document
pub fn decode_snapshot(data: &[u8]) -> Result<RoomSnapshot, CodecError> {
    decode(data)
}

/// Encode the local participant state for the signaling transport
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode_local_state(update: &LocalStateUpdate) -> Result<Bytes, CodecError> {
    encode(update)
}

/// Decode a side-channel message
///
/// # Errors
///
/// Returns an error if the input is empty, not JSON, or lacks a `type` tag
pub fn decode_message(data: &[u8]) -> Result<ChannelMessage, CodecError> {
    decode(data)
}

/// Encode a side-channel message
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode_message(message: &OutboundMessage) -> Result<Bytes, CodecError> {
    encode(message)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::TrackSid;

    #[test]
    fn test_decode_empty_input() {
        assert!(matches!(
            decode_snapshot(b""),
            Err(CodecError::InsufficientData)
        ));
        assert!(matches!(
            decode_message(b""),
            Err(CodecError::InsufficientData)
        ));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_snapshot(b"{not json"),
            Err(CodecError::InvalidFormat(_))
        ));
        // A side-channel message without a type tag is malformed.
        assert!(matches!(
            decode_message(br#"{"participant": "PA1"}"#),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_decode_message() {
        let message = decode_message(br#"{"type":"track_switch_off","off":["MT1"],"on":[]}"#)
            .expect("valid message");
        assert_eq!(message.type_name(), "track_switch_off");
    }

    #[test]
    fn test_encode_message() {
        let bytes = encode_message(&OutboundMessage::ClientReset {
            track: TrackSid::new("MT1"),
            id: 9,
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "client_reset");
        assert_eq!(value["track"], "MT1");
        assert_eq!(value["id"], 9);
    }

    #[test]
    fn test_decode_snapshot() {
        let snapshot =
            decode_snapshot(br#"{"type":"synced","participants":[]}"#).expect("valid snapshot");
        assert!(snapshot.is_synced());
    }
}

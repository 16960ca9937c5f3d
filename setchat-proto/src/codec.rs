//! Serialization for the `SetChat` wire protocol.
//!
//! Each WebSocket binary frame carries exactly one postcard-encoded event,
//! so no length-prefix framing is needed.

use crate::event::{ClientEvent, ServerEvent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("encode error: {0}")]
    Encode(String),
    /// The bytes are not a valid event.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Encodes a [`ClientEvent`] into a frame payload.
///
/// # Errors
///
/// Returns `CodecError::Encode` if the event cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(event).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decodes a [`ClientEvent`] from a frame payload.
///
/// # Errors
///
/// Returns `CodecError::Decode` if the bytes cannot be deserialized.
pub fn decode_client(bytes: &[u8]) -> Result<ClientEvent, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Encodes a [`ServerEvent`] into a frame payload.
///
/// # Errors
///
/// Returns `CodecError::Encode` if the event cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(event).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decodes a [`ServerEvent`] from a frame payload.
///
/// # Errors
///
/// Returns `CodecError::Decode` if the bytes cannot be deserialized.
pub fn decode_server(bytes: &[u8]) -> Result<ServerEvent, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

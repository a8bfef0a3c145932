//! JSON text-frame codec for the `WireChat` protocol.

use crate::message::Message;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The frame is not a valid message object.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Encodes a [`Message`] as a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the message cannot be serialized.
pub fn encode(message: &Message) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a JSON text frame into a [`Message`].
///
/// Anything that is not a JSON object matching the message schema is
/// rejected rather than coerced.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if the frame does not parse.
pub fn decode(frame: &str) -> Result<Message, CodecError> {
    serde_json::from_str(frame).map_err(|e| CodecError::Malformed(e.to_string()))
}

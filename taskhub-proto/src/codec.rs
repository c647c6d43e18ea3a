//! JSON encoding for hub frames.
//!
//! Browser clients speak JSON over WebSocket text messages, so frames are
//! encoded with `serde_json` rather than a binary format.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::hub::{ClientFrame, ServerFrame};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Frame exceeds the configured size limit.
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual frame size in bytes.
        size: usize,
        /// Configured limit in bytes.
        max: usize,
    },
}

fn encode<T: Serialize>(frame: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(frame)?)
}

fn decode<T: DeserializeOwned>(text: &str, max: usize) -> Result<T, CodecError> {
    if text.len() > max {
        return Err(CodecError::TooLarge {
            size: text.len(),
            max,
        });
    }
    Ok(serde_json::from_str(text)?)
}

/// Encodes a [`ServerFrame`] as a JSON text message.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode_server(frame: &ServerFrame) -> Result<String, CodecError> {
    encode(frame)
}

/// Decodes a [`ServerFrame`] from a JSON text message.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the text is not a valid frame.
pub fn decode_server(text: &str) -> Result<ServerFrame, CodecError> {
    decode(text, usize::MAX)
}

/// Encodes a [`ClientFrame`] as a JSON text message.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode_client(frame: &ClientFrame) -> Result<String, CodecError> {
    encode(frame)
}

/// Decodes a [`ClientFrame`], rejecting text longer than `max` bytes.
///
/// # Errors
///
/// Returns `CodecError::TooLarge` for oversized input, or
/// `CodecError::Serialization` if the text is not a valid frame.
pub fn decode_client(text: &str, max: usize) -> Result<ClientFrame, CodecError> {
    decode(text, max)
}

//! JSON codec for channel messages.
//!
//! The log stores exactly the bytes that are later written to client
//! connections, so a message is encoded once at publish time.

use bytes::Bytes;
use thiserror::Error;

use crate::message::{ChannelMessage, Identity};

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Decoded message violates a message invariant.
    #[error("Invalid message: {0}")]
    Invalid(String),
}

/// Encode a message to its wire form.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(message: &ChannelMessage) -> Result<Bytes, ProtocolError> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(ProtocolError::Encode)
}

/// Decode a message from its wire form.
///
/// # Errors
///
/// Returns an error if the payload is not a valid message, including
/// presence transitions that carry text.
pub fn decode(data: &[u8]) -> Result<ChannelMessage, ProtocolError> {
    let message: ChannelMessage = serde_json::from_slice(data).map_err(ProtocolError::Decode)?;
    if !message.is_well_formed() {
        return Err(ProtocolError::Invalid(format!(
            "{} message with{} text",
            message.kind,
            if message.text.is_some() { "" } else { "out" }
        )));
    }
    Ok(message)
}

/// Encode an identity for the presence store.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_identity(identity: &Identity) -> Result<Bytes, ProtocolError> {
    serde_json::to_vec(identity)
        .map(Bytes::from)
        .map_err(ProtocolError::Encode)
}

/// Decode an identity stored in the presence store.
///
/// # Errors
///
/// Returns an error if the value is not a valid identity.
pub fn decode_identity(data: &[u8]) -> Result<Identity, ProtocolError> {
    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}

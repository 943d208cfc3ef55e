//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Deserialization failed: malformed JSON, an unknown `type` tag,
    /// missing fields or wrong field types.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The message decoded but breaks a protocol rule, e.g. a request
    /// sent before `register`.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

//! Codec trait and the JSON implementation.
//!
//! The handler never calls `serde_json` directly; it goes through a
//! [`Codec`], which decides both the byte encoding and which kind of
//! WebSocket frame carries it.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// An encoded message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 text frame.
    Text(String),
    /// A binary frame.
    Binary(Vec<u8>),
}

/// Converts wire messages to frames and raw frame payloads back into
/// messages.
///
/// `Send + Sync + 'static` because a single codec instance is shared by
/// every connection task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a frame.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if the value cannot be
    /// represented in this format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Frame, ProtocolError>;

    /// Deserializes a received payload.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes are malformed or do
    /// not match `T`.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] producing JSON text frames, the format browser clients
/// speak natively.
///
/// ```rust
/// use veil_protocol::{ClientMessage, Codec, Frame, JsonCodec};
///
/// let codec = JsonCodec;
/// let msg: ClientMessage = codec
///     .decode(br#"{"type":"find-match","client_id":"alice"}"#)
///     .unwrap();
/// assert!(matches!(msg, ClientMessage::FindMatch { .. }));
///
/// let frame = codec.encode(&msg).unwrap();
/// assert!(matches!(frame, Frame::Text(_)));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Frame, ProtocolError> {
        serde_json::to_string(value)
            .map(Frame::Text)
            .map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

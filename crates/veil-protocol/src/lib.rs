//! Wire protocol for the Veil relay.
//!
//! - **Identifiers** ([`ClientId`], [`SessionId`]) shared by every layer.
//! - **Messages** ([`ClientMessage`], [`ServerMessage`]): the JSON objects
//!   exchanged with browser clients, one per WebSocket text frame.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how messages become
//!   frames and back.
//!
//! ```text
//! Transport (frames) → Protocol (messages) → Hub (presence, lobby, sessions)
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, Frame, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    CallFailure, ClientId, ClientMessage, Gender, PeerInfo, RelayKind,
    ServerMessage, SessionId, SessionKind,
};

/// Milliseconds since the Unix epoch, the timestamp unit on the wire.
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

//! Transport layer for the Veil relay.
//!
//! Provides the [`Transport`] and [`Connection`] traits so the rest of the
//! relay never touches sockets directly. Signaling clients are browsers,
//! so the default implementation is a WebSocket listener that speaks text
//! frames.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;

/// Opaque, process-local identifier for a client connection.
///
/// The presence registry stores it next to each client so that a stale
/// connection closing late cannot evict a newer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw counter value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw counter value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Source of inbound client connections.
pub trait Transport: Send + Sync + 'static {
    /// Connection type handed out by [`accept`](Transport::accept).
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Resolves with the next client that completed the transport handshake.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;
}

/// A single bidirectional client connection.
///
/// Sending and receiving are independent: a task blocked in
/// [`recv`](Connection::recv) must not prevent another task from calling
/// [`send_text`](Connection::send_text) on the same connection. The relay
/// relies on this to push peer messages while the reader waits for input.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    /// Sends a UTF-8 text frame.
    async fn send_text(&self, text: &str) -> Result<(), Self::Error>;

    /// Sends a binary frame.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next data frame (text or binary) as bytes.
    ///
    /// `Ok(None)` means the peer closed the connection cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Sends a close frame to the peer.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Process-local id assigned at accept time.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_usable_as_map_key() {
        use std::collections::HashMap;
        let mut owners = HashMap::new();
        owners.insert(ConnectionId::new(1), "alice");
        owners.insert(ConnectionId::new(2), "bob");
        assert_eq!(owners[&ConnectionId::new(1)], "alice");
        assert_ne!(ConnectionId::new(1), ConnectionId::new(2));
    }
}

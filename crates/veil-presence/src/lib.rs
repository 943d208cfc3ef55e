//! Presence registry for the Veil relay.
//!
//! Tracks every connected client's identity, connection, availability
//! and outbound channel. Every other component asks this registry
//! "is this client still here, and can it be paired?".
//!
//! ```text
//! Lobby / Sessions (above)  ← read availability, push notifications
//!     ↕
//! Presence (this crate)     ← who is connected, on which connection
//!     ↕
//! Protocol / Transport      ← ClientId, ConnectionId, ServerMessage
//! ```

mod client;
mod error;
mod registry;

pub use client::{Availability, ClientHandle, Outbox, Profile};
pub use error::PresenceError;
pub use registry::PresenceRegistry;

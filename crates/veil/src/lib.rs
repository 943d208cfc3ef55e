//! # Veil
//!
//! Signaling relay for anonymous one-to-one video chat.
//!
//! Clients connect over WebSocket, register an identity, and are paired
//! at random (or call a friend directly). The relay forwards the WebRTC
//! negotiation between the two members without reading it, brokers the
//! mutual identity reveal, and grants coins for time spent concealed.
//! Media never passes through the relay.
//!
//! ```text
//! Transport (WebSocket frames)
//!     → Protocol (JSON messages)
//!         → Hub: Presence + Lobby (one lock) │ Sessions (actors)
//!             → Economy (ledger, schedule, store writer)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use veil::prelude::*;
//!
//! # async fn start() -> Result<(), VeilError> {
//! let server = VeilServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod hub;
mod server;

pub use config::ServerConfig;
pub use error::VeilError;
pub use hub::Hub;
pub use server::{VeilServer, VeilServerBuilder};

/// Re-exports for embedding the relay.
pub mod prelude {
    pub use crate::{Hub, ServerConfig, VeilError, VeilServer, VeilServerBuilder};
    pub use veil_economy::{EconomyConfig, MemoryStore, RetryPolicy, Store, StoreError, UserStats};
    pub use veil_lobby::{LobbyConfig, MatchOutcome};
    pub use veil_presence::Profile;
    pub use veil_protocol::{
        ClientId, ClientMessage, RelayKind, ServerMessage, SessionId, SessionKind,
    };
    pub use veil_room::{SessionConfig, SessionState};
}

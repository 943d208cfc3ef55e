//! Unified error type for the Veil relay.

use veil_economy::StoreError;
use veil_lobby::LobbyError;
use veil_presence::PresenceError;
use veil_protocol::ProtocolError;
use veil_room::SessionError;
use veil_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum VeilError {
    /// A transport-level error (connection, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A presence error (client not registered).
    #[error(transparent)]
    Presence(#[from] PresenceError),

    /// A lobby error (peer unavailable, invite conflicts).
    #[error(transparent)]
    Lobby(#[from] LobbyError),

    /// A session-level error (not found, not a member).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The persistent store failed a read.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The request was well-formed JSON but makes no sense.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Invalid configuration (environment variable, bind address).
    #[error("configuration error: {0}")]
    Config(String),
}

impl VeilError {
    /// HTTP-style status code sent in the `error` message.
    pub fn code(&self) -> u16 {
        match self {
            Self::Protocol(_) | Self::BadRequest(_) | Self::Config(_) => 400,
            Self::Presence(_) => 404,
            Self::Lobby(e) => match e {
                LobbyError::SelfCall => 400,
                LobbyError::NotRegistered(_) | LobbyError::InviteNotFound { .. } => 404,
                LobbyError::AlreadyInSession(_)
                | LobbyError::PeerUnavailable(_)
                | LobbyError::InviteConflict(_) => 409,
            },
            Self::Session(e) => match e {
                SessionError::NotMember(..) | SessionError::Unavailable(_) => 404,
                SessionError::AlreadyInSession(..) => 409,
            },
            Self::Store(_) => 503,
            Self::Transport(_) => 500,
        }
    }
}

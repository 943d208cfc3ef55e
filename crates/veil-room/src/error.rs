//! Error types for the session layer.

use veil_protocol::{ClientId, SessionId};

/// Errors that can occur during session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The client is not one of the session's two members.
    #[error("client {0} is not a member of session {1}")]
    NotMember(ClientId, SessionId),

    /// A client asked for a session while already in one.
    #[error("client {0} is already in session {1}")]
    AlreadyInSession(ClientId, SessionId),

    /// The session actor's channel is closed.
    #[error("session {0} is unavailable")]
    Unavailable(SessionId),
}

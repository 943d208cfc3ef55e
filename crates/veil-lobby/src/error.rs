//! Error types for the lobby layer.

use veil_protocol::ClientId;

/// Errors that can occur during pairing and invite handling.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    /// The requesting client is not registered.
    #[error("client {0} is not registered")]
    NotRegistered(ClientId),

    /// The requesting client is already in a session.
    #[error("client {0} is already in a session")]
    AlreadyInSession(ClientId),

    /// The other party is offline, busy, or already ringing.
    #[error("peer {0} is unavailable")]
    PeerUnavailable(ClientId),

    /// The client would end up holding an invite as both caller and
    /// callee, or already has an outgoing call.
    #[error("client {0} already has a pending call")]
    InviteConflict(ClientId),

    /// No pending invite from `caller` to `callee`.
    #[error("no pending call from {caller} to {callee}")]
    InviteNotFound { caller: ClientId, callee: ClientId },

    /// A client tried to call itself.
    #[error("cannot call yourself")]
    SelfCall,
}

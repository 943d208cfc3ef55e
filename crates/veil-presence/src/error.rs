//! Error types for the presence layer.

use veil_protocol::ClientId;

/// Errors raised by [`PresenceRegistry`](crate::PresenceRegistry)
/// mutations. Plain lookups never fail; absence means the client is gone.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    /// No client with this id is registered.
    #[error("client {0} is not registered")]
    NotRegistered(ClientId),
}

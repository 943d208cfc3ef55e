//! The presence registry: who is connected right now.
//!
//! # Concurrency note
//!
//! `PresenceRegistry` is a plain `HashMap` wrapper, not a concurrent map.
//! It lives inside the lobby's critical section together with the waiting
//! pool and invite book, so that compound operations such as
//! "pick a partner, mark both busy, remove both from the pool" happen
//! under a single lock.

use std::collections::HashMap;
use std::time::Instant;

use veil_protocol::{ClientId, ServerMessage};
use veil_transport::ConnectionId;

use crate::{Availability, ClientHandle, Outbox, PresenceError, Profile};

/// Live directory of connected clients, keyed by client id.
///
/// ## Lifecycle
///
/// ```text
/// register() ──→ [Available] ⇄ [Busy] ──→ unregister()
///     ↑                                        │
///     └── register() again (new connection) ───┘
/// ```
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    clients: HashMap<ClientId, ClientHandle>,
}

impl PresenceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client, or overwrites an existing registration.
    ///
    /// The new entry always starts `Available`. Returns the replaced
    /// handle, if any, so the caller can clean up whatever the old
    /// connection was doing.
    pub fn register(
        &mut self,
        profile: Profile,
        connection: ConnectionId,
        outbox: Outbox,
    ) -> Option<ClientHandle> {
        let client_id = profile.client_id.clone();
        let handle = ClientHandle {
            profile,
            connection,
            availability: Availability::Available,
            outbox,
            registered_at: Instant::now(),
        };

        let previous = self.clients.insert(client_id.clone(), handle);
        match &previous {
            Some(old) => tracing::info!(
                %client_id,
                old = %old.connection,
                new = %connection,
                "client re-registered"
            ),
            None => tracing::info!(%client_id, %connection, "client registered"),
        }
        previous
    }

    /// Removes a client, but only if it is still registered on
    /// `connection`.
    ///
    /// A connection that closes after its client re-registered elsewhere
    /// finds a different connection id here and leaves the entry alone.
    pub fn unregister(
        &mut self,
        client_id: &ClientId,
        connection: ConnectionId,
    ) -> Option<ClientHandle> {
        match self.clients.get(client_id) {
            Some(handle) if handle.connection == connection => {}
            Some(_) => {
                tracing::debug!(
                    %client_id,
                    %connection,
                    "ignoring unregister from superseded connection"
                );
                return None;
            }
            None => return None,
        }

        let removed = self.clients.remove(client_id);
        tracing::info!(%client_id, %connection, "client unregistered");
        removed
    }

    /// Looks up a client. `None` means the client is gone.
    pub fn get(&self, client_id: &ClientId) -> Option<&ClientHandle> {
        self.clients.get(client_id)
    }

    /// `true` if the client is registered and not in a session.
    pub fn is_available(&self, client_id: &ClientId) -> bool {
        self.clients
            .get(client_id)
            .is_some_and(ClientHandle::is_available)
    }

    /// Flips a client between `Available` and `Busy`.
    ///
    /// # Errors
    /// [`PresenceError::NotRegistered`] if the client is gone.
    pub fn set_availability(
        &mut self,
        client_id: &ClientId,
        availability: Availability,
    ) -> Result<(), PresenceError> {
        let handle = self
            .clients
            .get_mut(client_id)
            .ok_or_else(|| PresenceError::NotRegistered(client_id.clone()))?;
        handle.availability = availability;
        Ok(())
    }

    /// Pushes a message to a client if it is still connected.
    pub fn notify(&self, client_id: &ClientId, msg: ServerMessage) -> bool {
        match self.clients.get(client_id) {
            Some(handle) => handle.notify(msg),
            None => {
                tracing::debug!(%client_id, "notify dropped: client gone");
                false
            }
        }
    }

    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `PresenceRegistry`, named
    //! `test_{operation}_{scenario}_{expected}`.

    use tokio::sync::mpsc;

    use super::*;

    fn cid(id: &str) -> ClientId {
        ClientId::from(id)
    }

    fn conn(id: u64) -> ConnectionId {
        ConnectionId::new(id)
    }

    fn outbox() -> (Outbox, mpsc::UnboundedReceiver<ServerMessage>) {
        mpsc::unbounded_channel()
    }

    // =====================================================================
    // register()
    // =====================================================================

    #[test]
    fn test_register_new_client_is_available() {
        let mut reg = PresenceRegistry::new();
        let (tx, _rx) = outbox();

        let previous = reg.register(Profile::new("a", "Ann"), conn(1), tx);

        assert!(previous.is_none());
        assert!(reg.is_available(&cid("a")));
        assert_eq!(reg.get(&cid("a")).unwrap().display_name(), "Ann");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_register_again_overwrites_connection_and_resets_availability() {
        let mut reg = PresenceRegistry::new();
        let (tx1, _rx1) = outbox();
        let (tx2, _rx2) = outbox();

        reg.register(Profile::new("a", "Ann"), conn(1), tx1);
        reg.set_availability(&cid("a"), Availability::Busy).unwrap();
        let previous = reg.register(Profile::new("a", "Ann 2"), conn(2), tx2);

        let previous = previous.expect("old handle returned");
        assert_eq!(previous.connection, conn(1));
        assert_eq!(previous.availability, Availability::Busy);

        let current = reg.get(&cid("a")).unwrap();
        assert_eq!(current.connection, conn(2));
        assert_eq!(current.display_name(), "Ann 2");
        assert!(current.is_available());
        assert_eq!(reg.len(), 1);
    }

    // =====================================================================
    // unregister()
    // =====================================================================

    #[test]
    fn test_unregister_matching_connection_removes_entry() {
        let mut reg = PresenceRegistry::new();
        let (tx, _rx) = outbox();
        reg.register(Profile::new("a", "Ann"), conn(1), tx);

        let removed = reg.unregister(&cid("a"), conn(1));

        assert!(removed.is_some());
        assert!(reg.get(&cid("a")).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_unregister_superseded_connection_keeps_new_entry() {
        let mut reg = PresenceRegistry::new();
        let (tx1, _rx1) = outbox();
        let (tx2, _rx2) = outbox();
        reg.register(Profile::new("a", "Ann"), conn(1), tx1);
        reg.register(Profile::new("a", "Ann"), conn(2), tx2);

        assert!(reg.unregister(&cid("a"), conn(1)).is_none());
        assert_eq!(reg.get(&cid("a")).unwrap().connection, conn(2));
    }

    #[test]
    fn test_unregister_twice_second_is_none() {
        let mut reg = PresenceRegistry::new();
        let (tx, _rx) = outbox();
        reg.register(Profile::new("a", "Ann"), conn(1), tx);

        assert!(reg.unregister(&cid("a"), conn(1)).is_some());
        assert!(reg.unregister(&cid("a"), conn(1)).is_none());
    }

    // =====================================================================
    // availability and lookups
    // =====================================================================

    #[test]
    fn test_absent_client_is_not_available_and_not_an_error() {
        let reg = PresenceRegistry::new();
        assert!(reg.get(&cid("ghost")).is_none());
        assert!(!reg.is_available(&cid("ghost")));
        assert!(!reg.contains(&cid("ghost")));
    }

    #[test]
    fn test_set_availability_unknown_client_errors() {
        let mut reg = PresenceRegistry::new();
        let err = reg
            .set_availability(&cid("ghost"), Availability::Busy)
            .unwrap_err();
        assert!(matches!(err, PresenceError::NotRegistered(id) if id == cid("ghost")));
    }

    #[test]
    fn test_set_availability_round_trip() {
        let mut reg = PresenceRegistry::new();
        let (tx, _rx) = outbox();
        reg.register(Profile::new("a", "Ann"), conn(1), tx);

        reg.set_availability(&cid("a"), Availability::Busy).unwrap();
        assert!(!reg.is_available(&cid("a")));
        reg.set_availability(&cid("a"), Availability::Available).unwrap();
        assert!(reg.is_available(&cid("a")));
    }

    // =====================================================================
    // notify()
    // =====================================================================

    #[test]
    fn test_notify_delivers_to_outbox() {
        let mut reg = PresenceRegistry::new();
        let (tx, mut rx) = outbox();
        reg.register(Profile::new("a", "Ann"), conn(1), tx);

        assert!(reg.notify(&cid("a"), ServerMessage::Waiting));
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::Waiting);
    }

    #[test]
    fn test_notify_closed_outbox_returns_false() {
        let mut reg = PresenceRegistry::new();
        let (tx, rx) = outbox();
        reg.register(Profile::new("a", "Ann"), conn(1), tx);
        drop(rx);

        assert!(!reg.notify(&cid("a"), ServerMessage::Waiting));
    }

    #[test]
    fn test_notify_unknown_client_returns_false() {
        let reg = PresenceRegistry::new();
        assert!(!reg.notify(&cid("ghost"), ServerMessage::Waiting));
    }

    #[test]
    fn test_profile_with_age() {
        let profile = Profile::new("a", "Ann").with_age(30);
        assert_eq!(profile.age, Some(30));
        assert_eq!(profile.gender, None);
    }
}

//! Client handle: the registry's record of one connected client.

use std::time::Instant;

use tokio::sync::mpsc;
use veil_protocol::{ClientId, Gender, PeerInfo, ServerMessage};
use veil_transport::ConnectionId;

/// Channel into a client's connection writer task.
///
/// Unbounded so that pushing a notification never awaits; this is what
/// lets the lobby notify clients from inside its critical section.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// What a client declared about itself at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub client_id: ClientId,
    pub display_name: String,
    pub age: Option<u8>,
    pub gender: Option<Gender>,
}

impl Profile {
    /// A profile with no optional attributes.
    pub fn new(client_id: impl Into<ClientId>, display_name: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            display_name: display_name.into(),
            age: None,
            gender: None,
        }
    }

    /// Sets the declared age.
    pub fn with_age(mut self, age: u8) -> Self {
        self.age = Some(age);
        self
    }
}

/// Whether the client can be offered a new session.
///
/// ```text
///   Available ──(paired / call accepted)──→ Busy
///       ↑                                     │
///       └──────────(session ended)────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Busy,
}

/// A connected client.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub profile: Profile,
    pub connection: ConnectionId,
    pub availability: Availability,
    pub outbox: Outbox,
    pub registered_at: Instant,
}

impl ClientHandle {
    pub fn client_id(&self) -> &ClientId {
        &self.profile.client_id
    }

    pub fn display_name(&self) -> &str {
        &self.profile.display_name
    }

    pub fn age(&self) -> Option<u8> {
        self.profile.age
    }

    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }

    /// The identity shown to the other member of a session.
    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            client_id: self.profile.client_id.clone(),
            display_name: self.profile.display_name.clone(),
        }
    }

    /// Pushes a message to the client's writer task.
    ///
    /// Returns `false` if the writer is gone, i.e. the connection is
    /// closing; callers treat that as "client is gone".
    pub fn notify(&self, msg: ServerMessage) -> bool {
        self.outbox.send(msg).is_ok()
    }
}

//! Identifiers and wire messages.
//!
//! Every message is an internally tagged JSON object:
//!
//! ```json
//! { "type": "find-match", "client_id": "alice" }
//! ```
//!
//! Tags are kebab-case, field names are snake_case.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identity of a connected client, as issued by the external identity
/// provider. Opaque to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    /// Creates a client id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a live two-party session.
///
/// Session ids are drawn at random so they cannot be enumerated, and are
/// kept below 2^53 so JavaScript clients can hold them as plain numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Largest id that survives a round trip through an IEEE-754 double.
    pub const MAX_SAFE: u64 = (1 << 53) - 1;
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{:x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Shared value types
// ---------------------------------------------------------------------------

/// How a session came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// Paired by the matchmaker; starts concealed and earns rewards.
    Random,
    /// An accepted friend call; never concealed, never rewarded.
    Friend,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => f.write_str("random"),
            Self::Friend => f.write_str("friend"),
        }
    }
}

/// Self-declared gender attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// Public identity of a session member, sent in `match`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub client_id: ClientId,
    pub display_name: String,
}

/// Why a friend call did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallFailure {
    /// The callee is offline, busy, or already ringing.
    Unavailable,
    /// The callee dropped while the call was ringing.
    Disconnected,
    /// Nobody answered before the invite expired.
    Timeout,
}

/// The three negotiation messages the relay forwards without reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayKind {
    Offer,
    Answer,
    Candidate,
}

impl RelayKind {
    /// Wraps a payload into the message delivered to the other member.
    pub fn forward(
        self,
        session_id: SessionId,
        from: ClientId,
        payload: serde_json::Value,
    ) -> ServerMessage {
        match self {
            Self::Offer => ServerMessage::Offer { session_id, from, payload },
            Self::Answer => ServerMessage::Answer { session_id, from, payload },
            Self::Candidate => {
                ServerMessage::Candidate { session_id, from, payload }
            }
        }
    }
}

impl fmt::Display for RelayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer => f.write_str("offer"),
            Self::Answer => f.write_str("answer"),
            Self::Candidate => f.write_str("candidate"),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → relay
// ---------------------------------------------------------------------------

/// Everything a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Announce identity. Must be the first message on a connection.
    Register {
        client_id: ClientId,
        display_name: String,
        #[serde(default)]
        age: Option<u8>,
        #[serde(default)]
        gender: Option<Gender>,
    },

    /// Ask for a random partner. The connection's registered identity is
    /// authoritative; `client_id` is accepted for compatibility.
    FindMatch {
        #[serde(default)]
        client_id: Option<ClientId>,
    },

    /// Leave the waiting pool.
    CancelMatch,

    CallFriend {
        caller_id: ClientId,
        caller_name: String,
        callee_id: ClientId,
    },

    AcceptCall {
        caller_id: ClientId,
        callee_id: ClientId,
    },

    RejectCall {
        caller_id: ClientId,
        callee_id: ClientId,
    },

    Offer {
        session_id: SessionId,
        payload: serde_json::Value,
    },

    Answer {
        session_id: SessionId,
        payload: serde_json::Value,
    },

    /// A network-path candidate.
    Candidate {
        session_id: SessionId,
        payload: serde_json::Value,
    },

    /// The client's peer connection reached the connected state.
    Connected { session_id: SessionId },

    RevealRequest { session_id: SessionId },

    RevealAccept { session_id: SessionId },

    ChatMessage { session_id: SessionId, text: String },

    /// End the current session ("next").
    LeaveSession { session_id: SessionId },

    Report {
        session_id: SessionId,
        reported_id: ClientId,
        reason: String,
        #[serde(default)]
        description: String,
    },

    GetStats,

    Heartbeat { client_time: u64 },
}

// ---------------------------------------------------------------------------
// Relay → client
// ---------------------------------------------------------------------------

/// Everything the relay may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Registered { client_id: ClientId },

    /// No partner was available; the client is in the waiting pool.
    Waiting,

    /// A session was created. Sent to both members.
    Match {
        session_id: SessionId,
        kind: SessionKind,
        members: Vec<PeerInfo>,
    },

    IncomingCall {
        caller_id: ClientId,
        caller_name: String,
    },

    CallFailed {
        callee_id: ClientId,
        reason: CallFailure,
    },

    CallRejected { callee_id: ClientId },

    /// The invite this callee was ringing for was withdrawn.
    CallCancelled { caller_id: ClientId },

    Offer {
        session_id: SessionId,
        from: ClientId,
        payload: serde_json::Value,
    },

    Answer {
        session_id: SessionId,
        from: ClientId,
        payload: serde_json::Value,
    },

    Candidate {
        session_id: SessionId,
        from: ClientId,
        payload: serde_json::Value,
    },

    RevealRequested { session_id: SessionId, from: ClientId },

    /// Both members consented; sent to both.
    Revealed { session_id: SessionId },

    Chat {
        session_id: SessionId,
        from: ClientId,
        text: String,
        /// Milliseconds since the Unix epoch.
        sent_at: u64,
    },

    /// The other member left or dropped; the session is over.
    PeerDisconnected { session_id: SessionId },

    /// Confirms a `leave-session` to the member who sent it.
    SessionEnded { session_id: SessionId },

    CoinsAwarded {
        session_id: SessionId,
        amount: u64,
        /// Coins granted by this session so far.
        total: u64,
    },

    Stats {
        coins: u64,
        total_sessions: u64,
        total_reveals: u64,
    },

    HeartbeatAck { client_time: u64, server_time: u64 },

    /// A request was rejected. `code` follows HTTP conventions.
    Error { code: u16, message: String },
}

// =========================================================================
// Tests
// =========================================================================

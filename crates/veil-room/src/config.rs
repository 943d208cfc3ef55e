//! Session configuration and state machine.

use serde::{Deserialize, Serialize};
use veil_economy::EconomyConfig;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Settings shared by every session the manager creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reward rules for Random sessions.
    pub economy: EconomyConfig,

    /// Command channel capacity per session actor.
    pub channel_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            economy: EconomyConfig::default(),
            channel_size: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The lifecycle state of a session.
///
/// ```text
/// Negotiating → Connected ─┬→ Concealed → Revealed ─┐
///                          └→ Revealed ─────────────┴→ Ended
/// ```
///
/// - **Negotiating**: Both members were told about the session and are
///   exchanging offer/answer/candidates through the relay.
/// - **Connected**: A member acknowledged a working peer connection.
///   Transient: the session moves on immediately.
/// - **Concealed**: Random sessions only. Identities hidden, coins accrue.
/// - **Revealed**: Both consented (or it is a Friend session).
/// - **Ended**: Terminal. Any state may end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Negotiating,
    Connected,
    Concealed,
    Revealed,
    Ended,
}

impl SessionState {
    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Negotiating, Connected)
                | (Connected, Concealed)
                | (Connected, Revealed)
                | (Concealed, Revealed)
                | (Negotiating | Connected | Concealed | Revealed, Ended)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Negotiating => write!(f, "Negotiating"),
            Self::Connected => write!(f, "Connected"),
            Self::Concealed => write!(f, "Concealed"),
            Self::Revealed => write!(f, "Revealed"),
            Self::Ended => write!(f, "Ended"),
        }
    }
}

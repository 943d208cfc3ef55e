//! Lobby configuration.

use std::time::Duration;

/// Settings for the matchmaker.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// How long a friend call rings before it is withdrawn.
    /// `None` keeps invites pending until accept, reject or disconnect.
    pub invite_timeout: Option<Duration>,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            invite_timeout: Some(Duration::from_secs(30)),
        }
    }
}

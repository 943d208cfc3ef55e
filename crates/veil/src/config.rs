//! Server configuration.
//!
//! Every knob has a default; [`ServerConfig::from_env`] overrides them
//! from `VEIL_*` environment variables for the binary.

use std::time::Duration;

use veil_economy::{EconomyConfig, RetryPolicy};
use veil_lobby::LobbyConfig;
use veil_room::SessionConfig;

use crate::VeilError;

/// Everything the server needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,

    /// How long a new connection may take to send `register`.
    pub register_timeout: Duration,

    /// A registered connection that sends nothing for this long is
    /// closed. Clients keep it alive with `heartbeat`.
    pub idle_timeout: Duration,

    pub lobby: LobbyConfig,
    pub session: SessionConfig,
    pub retry: RetryPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            register_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            lobby: LobbyConfig::default(),
            session: SessionConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Reads overrides from the process environment.
    ///
    /// | Variable                   | Field                          |
    /// |----------------------------|--------------------------------|
    /// | `VEIL_BIND`                | `bind_addr`                    |
    /// | `VEIL_IDLE_SECS`           | `idle_timeout`                 |
    /// | `VEIL_QUIET_SECS`          | `economy.quiet_period`         |
    /// | `VEIL_TICK_SECS`           | `economy.tick_interval`        |
    /// | `VEIL_MAX_SESSION_SECS`    | `economy.max_duration`         |
    /// | `VEIL_REVEAL_BONUS`        | `economy.reveal_bonus`         |
    /// | `VEIL_INVITE_TIMEOUT_SECS` | `lobby.invite_timeout` (0 = never) |
    ///
    /// # Errors
    /// [`VeilError::Config`] if a variable is set but not a number.
    pub fn from_env() -> Result<Self, VeilError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, VeilError> {
        let mut config = Self::default();
        let economy: &mut EconomyConfig = &mut config.session.economy;

        if let Some(bind) = lookup("VEIL_BIND") {
            config.bind_addr = bind;
        }
        if let Some(secs) = number(&lookup, "VEIL_IDLE_SECS")? {
            config.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = number(&lookup, "VEIL_QUIET_SECS")? {
            economy.quiet_period = Duration::from_secs(secs);
        }
        if let Some(secs) = number(&lookup, "VEIL_TICK_SECS")? {
            if secs == 0 {
                return Err(VeilError::Config("VEIL_TICK_SECS must be positive".into()));
            }
            economy.tick_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = number(&lookup, "VEIL_MAX_SESSION_SECS")? {
            economy.max_duration = Duration::from_secs(secs);
        }
        if let Some(bonus) = number(&lookup, "VEIL_REVEAL_BONUS")? {
            economy.reveal_bonus = bonus;
        }
        if let Some(secs) = number(&lookup, "VEIL_INVITE_TIMEOUT_SECS")? {
            config.lobby.invite_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(config)
    }
}

fn number(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>, VeilError> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|e| VeilError::Config(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}

//! Per-session reward ledger.
//!
//! [`SessionEconomy`] is pure bookkeeping. It never touches the store or
//! a timer itself: each [`SessionEvent`] yields a [`Settlement`] saying
//! what to write, what to announce and what to do with the
//! [`AccrualSchedule`](crate::AccrualSchedule). That keeps every rule
//! testable without a runtime.
//!
//! Exactly-once guarantees live here: the reveal bonus is granted on the
//! first `Revealed` only, finalization on the first `Ended` only, and no
//! event after `Ended` produces anything.

use tokio::time::Instant;
use tracing::debug;
use veil_protocol::{ClientId, SessionId};

use crate::{EconomyConfig, StoreWrite};

/// Lifecycle events the ledger reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session reached `Connected`.
    Connected { at: Instant },
    /// The accrual schedule fired.
    Tick { at: Instant },
    /// Both members consented to reveal.
    Revealed,
    /// The session is over.
    Ended,
}

/// What the session actor should do with its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Keep,
    Start,
    Stop,
}

/// Coins granted by one event, announced to both members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Award {
    pub amount: u64,
    /// Running total for the session after this grant.
    pub total: u64,
}

/// Outcome of [`SessionEconomy::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub writes: Vec<StoreWrite>,
    pub award: Option<Award>,
    pub directive: Directive,
}

impl Settlement {
    fn nothing() -> Self {
        Self {
            writes: Vec::new(),
            award: None,
            directive: Directive::Keep,
        }
    }

    fn stop() -> Self {
        Self {
            directive: Directive::Stop,
            ..Self::nothing()
        }
    }
}

/// Accrual bookkeeping for one Random session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccrualState {
    pub session_id: SessionId,
    /// Set on `Connected`; the cap is measured from here.
    pub started_at: Option<Instant>,
    pub total_granted: u64,
    pub revealed: bool,
    pub capped: bool,
    pub finalized: bool,
}

/// The economy of one Random session.
#[derive(Debug, Clone)]
pub struct SessionEconomy {
    config: EconomyConfig,
    members: [ClientId; 2],
    state: AccrualState,
}

impl SessionEconomy {
    pub fn new(config: EconomyConfig, session_id: SessionId, members: [ClientId; 2]) -> Self {
        Self {
            config,
            members,
            state: AccrualState {
                session_id,
                started_at: None,
                total_granted: 0,
                revealed: false,
                capped: false,
                finalized: false,
            },
        }
    }

    pub fn state(&self) -> &AccrualState {
        &self.state
    }

    /// Applies one event.
    pub fn dispatch(&mut self, event: SessionEvent) -> Settlement {
        if self.state.finalized {
            return Settlement::stop();
        }
        match event {
            SessionEvent::Connected { at } => self.on_connected(at),
            SessionEvent::Tick { at } => self.on_tick(at),
            SessionEvent::Revealed => self.on_revealed(),
            SessionEvent::Ended => self.on_ended(),
        }
    }

    fn on_connected(&mut self, at: Instant) -> Settlement {
        if self.state.started_at.is_some() || self.state.revealed {
            return Settlement::nothing();
        }
        self.state.started_at = Some(at);
        Settlement {
            directive: Directive::Start,
            ..Settlement::nothing()
        }
    }

    fn on_tick(&mut self, at: Instant) -> Settlement {
        let Some(started_at) = self.state.started_at else {
            return Settlement::stop();
        };
        if self.state.revealed || self.state.capped {
            return Settlement::stop();
        }
        if at.saturating_duration_since(started_at) >= self.config.max_duration {
            self.state.capped = true;
            debug!(
                session_id = %self.state.session_id,
                total = self.state.total_granted,
                "accrual cap reached"
            );
            return Settlement::stop();
        }

        self.grant(self.config.coins_per_tick, Directive::Keep)
    }

    fn on_revealed(&mut self) -> Settlement {
        if self.state.revealed {
            return Settlement::nothing();
        }
        self.state.revealed = true;
        self.grant(self.config.reveal_bonus, Directive::Stop)
    }

    fn on_ended(&mut self) -> Settlement {
        self.state.finalized = true;
        let mut writes = Vec::with_capacity(4);
        for user in &self.members {
            writes.push(StoreWrite::IncrementSessionCount { user: user.clone() });
        }
        if self.state.revealed {
            for user in &self.members {
                writes.push(StoreWrite::IncrementRevealCount { user: user.clone() });
            }
        }
        debug!(
            session_id = %self.state.session_id,
            total = self.state.total_granted,
            revealed = self.state.revealed,
            "economy finalized"
        );
        Settlement {
            writes,
            award: None,
            directive: Directive::Stop,
        }
    }

    fn grant(&mut self, amount: u64, directive: Directive) -> Settlement {
        if amount == 0 {
            return Settlement {
                directive,
                ..Settlement::nothing()
            };
        }
        self.state.total_granted += amount;
        let mut writes: Vec<StoreWrite> = self
            .members
            .iter()
            .map(|user| StoreWrite::IncrementCoins {
                user: user.clone(),
                amount,
            })
            .collect();
        writes.push(StoreWrite::IncrementSessionCoins {
            session_id: self.state.session_id,
            amount,
        });
        Settlement {
            writes,
            award: Some(Award {
                amount,
                total: self.state.total_granted,
            }),
            directive,
        }
    }
}

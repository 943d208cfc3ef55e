//! The matchmaker: random pairing plus friend-call bookkeeping.
//!
//! # Atomicity
//!
//! Every method takes `&mut self` and `&mut PresenceRegistry`. The hub
//! keeps both behind one mutex, so "select a partner", "mark both busy"
//! and "drop both from the pool" form a single step. Nothing here awaits;
//! notifications go through the clients' unbounded outboxes.
//!
//! # Who notifies whom
//!
//! The matchmaker sends the invite-flow notifications itself
//! (`incoming-call`, `call-rejected`, `call-failed`, `call-cancelled`)
//! because only it knows which invites exist. `match` and `waiting` are
//! sent by the caller, which owns session creation.

use veil_presence::{Availability, PresenceRegistry};
use veil_protocol::{CallFailure, ClientId, ServerMessage};

use crate::{Invite, InviteBook, LobbyConfig, LobbyError, WaitingPool};

/// Result of a random-match request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// A partner was reserved. Both clients are now `Busy`.
    Paired { partner: ClientId },
    /// Nobody suitable is waiting; the requester joined the pool.
    Queued,
}

/// Owns the waiting pool and the invite book.
#[derive(Debug, Default)]
pub struct Matchmaker {
    config: LobbyConfig,
    pool: WaitingPool,
    invites: InviteBook,
}

impl Matchmaker {
    pub fn new(config: LobbyConfig) -> Self {
        Self {
            config,
            pool: WaitingPool::new(),
            invites: InviteBook::new(),
        }
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    // -----------------------------------------------------------------
    // Random pairing
    // -----------------------------------------------------------------

    /// Pairs `client` with the best waiting candidate, or queues it.
    ///
    /// On success both clients are marked `Busy`, neither is left in the
    /// pool, and any invites involving either of them are withdrawn with
    /// the counterparties notified.
    ///
    /// # Errors
    /// - [`LobbyError::NotRegistered`] if `client` is unknown.
    /// - [`LobbyError::AlreadyInSession`] if `client` is busy.
    pub fn request_match(
        &mut self,
        presence: &mut PresenceRegistry,
        client: &ClientId,
    ) -> Result<MatchOutcome, LobbyError> {
        let handle = presence
            .get(client)
            .ok_or_else(|| LobbyError::NotRegistered(client.clone()))?;
        if !handle.is_available() {
            return Err(LobbyError::AlreadyInSession(client.clone()));
        }

        let Some(partner) = self.pool.take_partner(presence, client) else {
            self.pool.enqueue(client.clone());
            tracing::debug!(%client, waiting = self.pool.len(), "queued for match");
            return Ok(MatchOutcome::Queued);
        };

        self.pool.remove(client);
        self.reserve(presence, client, &partner);
        tracing::info!(%client, %partner, "random pair reserved");
        Ok(MatchOutcome::Paired { partner })
    }

    /// Removes `client` from the waiting pool. Returns `true` if it was
    /// waiting.
    pub fn cancel_match(&mut self, client: &ClientId) -> bool {
        let removed = self.pool.remove(client);
        if removed {
            tracing::debug!(%client, "left waiting pool");
        }
        removed
    }

    pub fn is_waiting(&self, client: &ClientId) -> bool {
        self.pool.contains(client)
    }

    pub fn waiting_len(&self) -> usize {
        self.pool.len()
    }

    // -----------------------------------------------------------------
    // Friend calls
    // -----------------------------------------------------------------

    /// Rings `callee` on behalf of `caller`.
    ///
    /// Sends `incoming-call` to the callee and returns the stored invite
    /// so the hub can arm its expiry timer.
    ///
    /// # Errors
    /// - [`LobbyError::SelfCall`] when both ids are equal.
    /// - [`LobbyError::NotRegistered`] / [`LobbyError::AlreadyInSession`]
    ///   for a caller that cannot start a session.
    /// - [`LobbyError::InviteConflict`] if the caller is already ringing
    ///   someone or is being rung.
    /// - [`LobbyError::PeerUnavailable`] if the callee is offline, busy,
    ///   or already involved in another invite. No invite is created and
    ///   the callee hears nothing.
    pub fn call_friend(
        &mut self,
        presence: &mut PresenceRegistry,
        caller: &ClientId,
        caller_name: String,
        callee: &ClientId,
    ) -> Result<Invite, LobbyError> {
        if caller == callee {
            return Err(LobbyError::SelfCall);
        }
        let handle = presence
            .get(caller)
            .ok_or_else(|| LobbyError::NotRegistered(caller.clone()))?;
        if !handle.is_available() {
            return Err(LobbyError::AlreadyInSession(caller.clone()));
        }
        if self.invites.incoming(caller).is_some() || self.invites.outgoing(caller).is_some() {
            return Err(LobbyError::InviteConflict(caller.clone()));
        }
        if !presence.is_available(callee)
            || self.invites.incoming(callee).is_some()
            || self.invites.outgoing(callee).is_some()
        {
            tracing::debug!(%caller, %callee, "friend call refused: callee unavailable");
            return Err(LobbyError::PeerUnavailable(callee.clone()));
        }

        let invite = self
            .invites
            .insert(caller.clone(), caller_name, callee.clone());
        presence.notify(
            callee,
            ServerMessage::IncomingCall {
                caller_id: invite.caller.clone(),
                caller_name: invite.caller_name.clone(),
            },
        );
        tracing::info!(%caller, %callee, serial = invite.serial, "friend call ringing");
        Ok(invite)
    }

    /// Accepts the pending invite from `caller` to `callee`.
    ///
    /// The invite is consumed whether or not the session can start. On
    /// success both clients are `Busy` and out of the pool.
    ///
    /// # Errors
    /// - [`LobbyError::InviteNotFound`] if no such invite is pending.
    /// - [`LobbyError::AlreadyInSession`] if the callee is busy.
    /// - [`LobbyError::PeerUnavailable`] if the caller went offline or
    ///   got paired elsewhere in the meantime.
    pub fn accept_invite(
        &mut self,
        presence: &mut PresenceRegistry,
        caller: &ClientId,
        callee: &ClientId,
    ) -> Result<Invite, LobbyError> {
        let invite = self
            .invites
            .take(caller, callee)
            .ok_or_else(|| LobbyError::InviteNotFound {
                caller: caller.clone(),
                callee: callee.clone(),
            })?;

        if !presence.is_available(callee) {
            return Err(LobbyError::AlreadyInSession(callee.clone()));
        }
        if !presence.is_available(caller) {
            tracing::debug!(%caller, %callee, "accept failed: caller unavailable");
            return Err(LobbyError::PeerUnavailable(caller.clone()));
        }

        self.pool.remove(caller);
        self.pool.remove(callee);
        self.reserve(presence, caller, callee);
        tracing::info!(%caller, %callee, "friend call accepted");
        Ok(invite)
    }

    /// Declines the pending invite and tells the caller.
    ///
    /// # Errors
    /// [`LobbyError::InviteNotFound`] if no such invite is pending.
    pub fn reject_invite(
        &mut self,
        presence: &mut PresenceRegistry,
        caller: &ClientId,
        callee: &ClientId,
    ) -> Result<(), LobbyError> {
        self.invites
            .take(caller, callee)
            .ok_or_else(|| LobbyError::InviteNotFound {
                caller: caller.clone(),
                callee: callee.clone(),
            })?;
        presence.notify(
            caller,
            ServerMessage::CallRejected {
                callee_id: callee.clone(),
            },
        );
        tracing::info!(%caller, %callee, "friend call rejected");
        Ok(())
    }

    /// Withdraws the invite ringing at `callee` if it is still the one
    /// identified by `serial`. The caller gets `call-failed` with
    /// [`CallFailure::Timeout`], the callee `call-cancelled`.
    ///
    /// Returns `false` when the invite was already resolved.
    pub fn expire_invite(
        &mut self,
        presence: &mut PresenceRegistry,
        callee: &ClientId,
        serial: u64,
    ) -> bool {
        if self.invites.incoming(callee).is_none_or(|i| i.serial != serial) {
            return false;
        }
        let Some(invite) = self.invites.take_incoming(callee) else {
            return false;
        };
        presence.notify(
            &invite.caller,
            ServerMessage::CallFailed {
                callee_id: invite.callee.clone(),
                reason: CallFailure::Timeout,
            },
        );
        presence.notify(
            &invite.callee,
            ServerMessage::CallCancelled {
                caller_id: invite.caller.clone(),
            },
        );
        tracing::info!(caller = %invite.caller, %callee, "friend call timed out");
        true
    }

    pub fn pending_invite(&self, callee: &ClientId) -> Option<&Invite> {
        self.invites.incoming(callee)
    }

    pub fn pending_invites(&self) -> usize {
        self.invites.len()
    }

    // -----------------------------------------------------------------
    // Departure
    // -----------------------------------------------------------------

    /// Forgets everything the lobby holds for a departing client.
    ///
    /// Removes it from the pool. An invite ringing at it fails with
    /// [`CallFailure::Disconnected`] at the caller; an invite it placed is
    /// cancelled at the callee. Safe to call more than once.
    pub fn on_disconnect(&mut self, presence: &PresenceRegistry, client: &ClientId) {
        self.pool.remove(client);

        if let Some(invite) = self.invites.take_incoming(client) {
            presence.notify(
                &invite.caller,
                ServerMessage::CallFailed {
                    callee_id: invite.callee.clone(),
                    reason: CallFailure::Disconnected,
                },
            );
        }
        if let Some(invite) = self.invites.take_outgoing(client) {
            presence.notify(
                &invite.callee,
                ServerMessage::CallCancelled {
                    caller_id: invite.caller.clone(),
                },
            );
        }
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    /// Marks both clients busy and withdraws their other invites.
    fn reserve(&mut self, presence: &mut PresenceRegistry, a: &ClientId, b: &ClientId) {
        for id in [a, b] {
            // Both were checked available under this same lock.
            let _ = presence.set_availability(id, Availability::Busy);
            self.withdraw_invites(presence, id);
        }
    }

    /// Withdraws invites involving a client that just became busy.
    fn withdraw_invites(&mut self, presence: &PresenceRegistry, client: &ClientId) {
        if let Some(invite) = self.invites.take_incoming(client) {
            presence.notify(
                &invite.caller,
                ServerMessage::CallFailed {
                    callee_id: invite.callee.clone(),
                    reason: CallFailure::Unavailable,
                },
            );
        }
        if let Some(invite) = self.invites.take_outgoing(client) {
            presence.notify(
                &invite.callee,
                ServerMessage::CallCancelled {
                    caller_id: invite.caller.clone(),
                },
            );
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

//! The hub: shared state behind every connection task.
//!
//! Presence and matchmaking share one async mutex, so "is B available?"
//! and "mark A and B busy" happen in one critical section and no client
//! is ever handed to two partners. Nothing inside that section awaits;
//! notifications go through unbounded outboxes.
//!
//! Live sessions sit outside the lock in the [`SessionManager`]'s
//! concurrent tables. Relay traffic never touches the lobby mutex.
//!
//! Ending a session has two halves. Under the lock the session is
//! detached from the tables and its remaining members are made available
//! again. After the lock is released the actor is told to end, which is
//! when the members hear about it. A member reacting to
//! `peer-disconnected` therefore always finds itself pairable.
//!
//! ```text
//!            ┌──────────── Mutex<Lobby> ────────────┐
//! handler ──►│ PresenceRegistry   Matchmaker        │──► outboxes
//!     │      └──────────────────────────────────────┘
//!     └────► SessionManager (DashMap) ──► session actors ──► StoreWriter
//! ```

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use veil_economy::{Report, Store, StoreWrite, StoreWriter, UserStats};
use veil_lobby::{LobbyError, MatchOutcome, Matchmaker};
use veil_presence::{Availability, Outbox, PresenceRegistry, Profile};
use veil_protocol::{
    CallFailure, ClientId, RelayKind, ServerMessage, SessionId, SessionKind, unix_millis,
};
use veil_room::{EndReason, Member, SessionError, SessionHandle, SessionManager};
use veil_transport::ConnectionId;

use crate::{ServerConfig, VeilError};

/// Everything guarded by the lobby lock.
struct Lobby {
    presence: PresenceRegistry,
    matchmaker: Matchmaker,
}

struct Inner {
    lobby: Mutex<Lobby>,
    sessions: SessionManager,
    writer: StoreWriter,
}

/// Cheaply cloneable handle to the relay's shared state.
///
/// Every method takes the calling client's id as established at
/// registration; the connection handler never lets a client speak for
/// somebody else.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("live_sessions", &self.inner.sessions.len())
            .finish_non_exhaustive()
    }
}

impl Hub {
    pub fn new(config: &ServerConfig, store: Arc<dyn Store>) -> Self {
        let writer = StoreWriter::new(store, config.retry);
        Self {
            inner: Arc::new(Inner {
                lobby: Mutex::new(Lobby {
                    presence: PresenceRegistry::new(),
                    matchmaker: Matchmaker::new(config.lobby.clone()),
                }),
                sessions: SessionManager::new(config.session.clone(), writer.clone()),
                writer,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.inner.writer.store()
    }

    // -----------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------

    /// Registers a client on `connection`.
    ///
    /// A client id that is already registered elsewhere is treated as
    /// a departure of the old connection first: its waiting entry and
    /// invites are dropped and its session ends with `peer-disconnected`
    /// at the partner. The new entry starts `Available`.
    ///
    /// The cleanup and the new entry happen in one critical section, so
    /// concurrent registrations of the same id serialize and each one
    /// cleans up after the one before it.
    pub async fn register(&self, profile: Profile, connection: ConnectionId, outbox: Outbox) {
        let client_id = profile.client_id.clone();
        let detached = {
            let mut lobby = self.inner.lobby.lock().await;
            let Lobby {
                presence,
                matchmaker,
            } = &mut *lobby;
            if let Some(old) = presence.get(&client_id).map(|h| h.connection) {
                debug!(%client_id, %old, new = %connection, "replacing registration");
                presence.unregister(&client_id, old);
                matchmaker.on_disconnect(presence, &client_id);
            }
            let detached = self.detach_session_of(presence, &client_id);
            let replaced = presence.register(profile, connection, outbox);
            debug_assert!(replaced.is_none(), "old entry was unregistered above");
            detached
        };
        if let Some(handle) = detached {
            self.finalize(handle, EndReason::PeerDisconnected(client_id))
                .await;
        }
    }

    /// Runs departure cleanup for a closed connection.
    ///
    /// Does nothing if the client has since re-registered on another
    /// connection. Otherwise: leaves the pool, fails or cancels any
    /// ringing invite, and ends the client's session, freeing the partner.
    pub async fn disconnect(&self, client_id: &ClientId, connection: ConnectionId) {
        let detached = {
            let mut lobby = self.inner.lobby.lock().await;
            let Lobby {
                presence,
                matchmaker,
            } = &mut *lobby;
            if presence.unregister(client_id, connection).is_none() {
                return;
            }
            matchmaker.on_disconnect(presence, client_id);
            self.detach_session_of(presence, client_id)
        };
        if let Some(handle) = detached {
            self.finalize(handle, EndReason::PeerDisconnected(client_id.clone()))
                .await;
        }
    }

    // -----------------------------------------------------------------
    // Random matching
    // -----------------------------------------------------------------

    /// Pairs the client with a waiting partner, or queues it.
    ///
    /// When queued the client gets `waiting`. When paired both members
    /// get `match` for a new Random session.
    ///
    /// # Errors
    /// Lobby errors when the client is unknown or already busy.
    pub async fn find_match(&self, client_id: &ClientId) -> Result<MatchOutcome, VeilError> {
        let mut lobby = self.inner.lobby.lock().await;
        let outcome = {
            let Lobby {
                presence,
                matchmaker,
            } = &mut *lobby;
            matchmaker.request_match(presence, client_id)?
        };

        match &outcome {
            MatchOutcome::Queued => {
                lobby.presence.notify(client_id, ServerMessage::Waiting);
            }
            MatchOutcome::Paired { partner } => {
                self.open_session(&mut lobby, SessionKind::Random, client_id, partner)?;
            }
        }
        Ok(outcome)
    }

    /// Leaves the waiting pool. Returns `true` if the client was waiting.
    pub async fn cancel_match(&self, client_id: &ClientId) -> bool {
        self.inner.lobby.lock().await.matchmaker.cancel_match(client_id)
    }

    // -----------------------------------------------------------------
    // Friend calls
    // -----------------------------------------------------------------

    /// Rings `callee`. An unavailable callee hears nothing; the caller
    /// gets `call-failed` with reason `unavailable`.
    ///
    /// # Errors
    /// Lobby errors for a caller that cannot place calls right now.
    pub async fn call_friend(
        &self,
        caller: &ClientId,
        caller_name: String,
        callee: &ClientId,
    ) -> Result<(), VeilError> {
        let mut lobby = self.inner.lobby.lock().await;
        let Lobby {
            presence,
            matchmaker,
        } = &mut *lobby;

        let invite = match matchmaker.call_friend(presence, caller, caller_name, callee) {
            Ok(invite) => invite,
            Err(LobbyError::PeerUnavailable(_)) => {
                presence.notify(
                    caller,
                    ServerMessage::CallFailed {
                        callee_id: callee.clone(),
                        reason: CallFailure::Unavailable,
                    },
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(timeout) = matchmaker.config().invite_timeout {
            let hub = self.clone();
            let callee = invite.callee.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let mut lobby = hub.inner.lobby.lock().await;
                let Lobby {
                    presence,
                    matchmaker,
                } = &mut *lobby;
                matchmaker.expire_invite(presence, &callee, invite.serial);
            });
        }
        Ok(())
    }

    /// Accepts the call `caller` placed to `callee` and opens a Friend
    /// session.
    ///
    /// # Errors
    /// - No such invite (404).
    /// - Caller went away or got paired elsewhere (409).
    pub async fn accept_call(
        &self,
        callee: &ClientId,
        caller: &ClientId,
    ) -> Result<SessionId, VeilError> {
        let mut lobby = self.inner.lobby.lock().await;
        {
            let Lobby {
                presence,
                matchmaker,
            } = &mut *lobby;
            matchmaker.accept_invite(presence, caller, callee)?;
        }
        let handle = self.open_session(&mut lobby, SessionKind::Friend, caller, callee)?;
        Ok(handle.session_id())
    }

    /// Declines a call. The caller gets `call-rejected`.
    ///
    /// # Errors
    /// No such invite (404).
    pub async fn reject_call(&self, callee: &ClientId, caller: &ClientId) -> Result<(), VeilError> {
        let mut lobby = self.inner.lobby.lock().await;
        let Lobby {
            presence,
            matchmaker,
        } = &mut *lobby;
        matchmaker.reject_invite(presence, caller, callee)?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Session traffic
    // -----------------------------------------------------------------

    /// Forwards an offer, answer or candidate to the other member.
    ///
    /// Traffic for a session that ended, or from a non-member, is
    /// dropped silently.
    pub async fn relay(
        &self,
        from: &ClientId,
        session_id: SessionId,
        kind: RelayKind,
        payload: serde_json::Value,
    ) {
        let Some(handle) = self.member_session(from, session_id) else {
            return;
        };
        if let Err(e) = handle.relay(from.clone(), kind, payload).await {
            debug!(%session_id, %kind, error = %e, "relay dropped");
        }
    }

    /// A member's peer connection came up.
    pub async fn connected(&self, from: &ClientId, session_id: SessionId) {
        if let Some(handle) = self.member_session(from, session_id) {
            let _ = handle.connected(from.clone()).await;
        }
    }

    pub async fn reveal_request(&self, from: &ClientId, session_id: SessionId) {
        if let Some(handle) = self.member_session(from, session_id) {
            let _ = handle.reveal_request(from.clone()).await;
        }
    }

    pub async fn reveal_accept(&self, from: &ClientId, session_id: SessionId) {
        if let Some(handle) = self.member_session(from, session_id) {
            let _ = handle.reveal_accept(from.clone()).await;
        }
    }

    pub async fn chat(&self, from: &ClientId, session_id: SessionId, text: String) {
        if let Some(handle) = self.member_session(from, session_id) {
            let _ = handle.chat(from.clone(), text).await;
        }
    }

    /// Ends the session on a member's request ("next").
    ///
    /// The leaver gets `session-ended`, the partner `peer-disconnected`,
    /// and both become available again. A second leave for the same
    /// session is a no-op.
    pub async fn leave_session(&self, client_id: &ClientId, session_id: SessionId) {
        if self.member_session(client_id, session_id).is_none() {
            return;
        }
        let detached = {
            let mut lobby = self.inner.lobby.lock().await;
            let handle = self.inner.sessions.detach(session_id);
            if let Some(handle) = &handle {
                self.release(&mut lobby.presence, handle.members());
            }
            handle
        };
        if let Some(handle) = detached {
            self.finalize(handle, EndReason::PeerLeft(client_id.clone()))
                .await;
        }
    }

    /// Files a report against the other member of a session.
    ///
    /// While the session is live both parties must be its members. A
    /// report for a session that already ended is accepted as is, since
    /// clients usually report right after leaving.
    ///
    /// # Errors
    /// - Reporting yourself (400).
    /// - Naming someone outside a live session (404).
    pub fn report(
        &self,
        reporter: &ClientId,
        session_id: SessionId,
        reported: ClientId,
        reason: String,
        description: String,
    ) -> Result<(), VeilError> {
        if *reporter == reported {
            return Err(VeilError::BadRequest("cannot report yourself".into()));
        }
        if let Some(handle) = self.inner.sessions.get(session_id) {
            for party in [reporter, &reported] {
                if !handle.is_member(party) {
                    return Err(SessionError::NotMember(party.clone(), session_id).into());
                }
            }
        }

        info!(%session_id, %reporter, %reported, %reason, "report filed");
        self.inner
            .writer
            .submit(vec![StoreWrite::CreateReport(Report {
                session_id,
                reporter: reporter.clone(),
                reported,
                reason,
                description,
                created_at: unix_millis(),
            })]);
        Ok(())
    }

    /// Lifetime counters for a user, read straight from the store.
    ///
    /// # Errors
    /// The store is unreachable (503).
    pub async fn stats(&self, client_id: &ClientId) -> Result<UserStats, VeilError> {
        Ok(self.store().get_user_stats(client_id).await?)
    }

    /// Ends every live session. Members are told `session-ended`.
    pub async fn shutdown(&self) {
        let detached = {
            let mut lobby = self.inner.lobby.lock().await;
            let handles = self.inner.sessions.detach_all();
            for handle in &handles {
                self.release(&mut lobby.presence, handle.members());
            }
            handles
        };
        let ended = detached.len();
        for handle in detached {
            self.finalize(handle, EndReason::Shutdown).await;
        }
        info!(ended, "hub shut down");
    }

    // -----------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------

    pub async fn is_registered(&self, client_id: &ClientId) -> bool {
        self.inner.lobby.lock().await.presence.contains(client_id)
    }

    pub async fn is_available(&self, client_id: &ClientId) -> bool {
        self.inner.lobby.lock().await.presence.is_available(client_id)
    }

    pub async fn is_waiting(&self, client_id: &ClientId) -> bool {
        self.inner.lobby.lock().await.matchmaker.is_waiting(client_id)
    }

    pub async fn pending_invites(&self) -> usize {
        self.inner.lobby.lock().await.matchmaker.pending_invites()
    }

    /// The session a client is in right now.
    pub fn session_of(&self, client_id: &ClientId) -> Option<SessionHandle> {
        let session_id = self.inner.sessions.session_of(client_id)?;
        self.inner.sessions.get(session_id)
    }

    pub fn live_sessions(&self) -> usize {
        self.inner.sessions.len()
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    /// Creates a session for two clients the matchmaker just reserved.
    /// On failure the reservation is rolled back.
    fn open_session(
        &self,
        lobby: &mut Lobby,
        kind: SessionKind,
        a: &ClientId,
        b: &ClientId,
    ) -> Result<SessionHandle, VeilError> {
        let member = |id: &ClientId| {
            lobby.presence.get(id).map(|h| Member {
                client_id: id.clone(),
                display_name: h.display_name().to_string(),
                outbox: h.outbox.clone(),
            })
        };
        let created: Result<SessionHandle, VeilError> = match (member(a), member(b)) {
            (Some(ma), Some(mb)) => self.inner.sessions.create(kind, [ma, mb]).map_err(Into::into),
            _ => Err(LobbyError::PeerUnavailable(b.clone()).into()),
        };

        if created.is_err() {
            warn!(%a, %b, %kind, "session could not start; releasing both clients");
            for id in [a, b] {
                let _ = lobby.presence.set_availability(id, Availability::Available);
            }
        }
        created
    }

    fn member_session(&self, client_id: &ClientId, session_id: SessionId) -> Option<SessionHandle> {
        let Some(handle) = self.inner.sessions.get(session_id) else {
            debug!(%session_id, %client_id, "dropping message for unknown session");
            return None;
        };
        if !handle.is_member(client_id) {
            debug!(%session_id, %client_id, "dropping message from non-member");
            return None;
        }
        Some(handle)
    }

    /// Detaches the client's session, if any, and frees its other
    /// member. Runs under the lobby lock; the caller finalizes the
    /// returned handle once the lock is released.
    fn detach_session_of(
        &self,
        presence: &mut PresenceRegistry,
        client_id: &ClientId,
    ) -> Option<SessionHandle> {
        let handle = self.inner.sessions.detach_for(client_id)?;
        self.release(presence, handle.members());
        Some(handle)
    }

    /// Makes the still-registered members of a detached session pairable
    /// again.
    fn release(&self, presence: &mut PresenceRegistry, members: &[ClientId; 2]) {
        for id in members {
            if self.inner.sessions.session_of(id).is_some() || !presence.contains(id) {
                continue;
            }
            let _ = presence.set_availability(id, Availability::Available);
        }
    }

    async fn finalize(&self, handle: SessionHandle, reason: EndReason) {
        let summary = self.inner.sessions.finalize(handle, reason).await;
        debug!(
            session_id = %summary.session_id,
            coins = summary.coins,
            revealed = summary.revealed,
            "session finalized"
        );
    }
}

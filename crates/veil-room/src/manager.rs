//! Session manager: creates sessions, tracks membership, ends them once.

use dashmap::DashMap;
use rand::Rng;
use veil_economy::{StoreWrite, StoreWriter};
use veil_protocol::{ClientId, PeerInfo, ServerMessage, SessionId, SessionKind, unix_millis};

use crate::session::spawn_session;
use crate::{EndReason, Member, SessionConfig, SessionError, SessionHandle, SessionSummary};

/// Tracks every live session and which client is in which.
///
/// Both tables are concurrent maps, so relay lookups from many
/// connection tasks never contend on the lobby lock.
///
/// A client is in at most ONE session at a time. The
/// lobby guarantees it by marking both members busy before calling
/// [`create`](Self::create); the manager double-checks.
#[derive(Debug)]
pub struct SessionManager {
    config: SessionConfig,
    writer: StoreWriter,

    /// Live sessions, keyed by session ID.
    live: DashMap<SessionId, SessionHandle>,

    /// Maps each client to the session it is currently in.
    members: DashMap<ClientId, SessionId>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, writer: StoreWriter) -> Self {
        Self {
            config,
            writer,
            live: DashMap::new(),
            members: DashMap::new(),
        }
    }

    /// Spawns a session for two members and tells both about it.
    ///
    /// Sends `match` to each member (listing both identities), records the
    /// session start in the store, and returns the handle. The session
    /// starts in `Negotiating`.
    ///
    /// # Errors
    /// [`SessionError::AlreadyInSession`] if either member is still
    /// mapped to a live session. Nothing is created in that case.
    pub fn create(
        &self,
        kind: SessionKind,
        members: [Member; 2],
    ) -> Result<SessionHandle, SessionError> {
        for member in &members {
            if let Some(existing) = self.members.get(&member.client_id) {
                return Err(SessionError::AlreadyInSession(
                    member.client_id.clone(),
                    *existing,
                ));
            }
        }

        let session_id = self.fresh_id();
        let peers: Vec<PeerInfo> = members
            .iter()
            .map(|m| PeerInfo {
                client_id: m.client_id.clone(),
                display_name: m.display_name.clone(),
            })
            .collect();
        let ids = [members[0].client_id.clone(), members[1].client_id.clone()];

        for member in &members {
            let _ = member.outbox.send(ServerMessage::Match {
                session_id,
                kind,
                members: peers.clone(),
            });
        }

        let handle = spawn_session(session_id, kind, members, &self.config, self.writer.clone());
        self.live.insert(session_id, handle.clone());
        for id in &ids {
            self.members.insert(id.clone(), session_id);
        }

        self.writer.submit(vec![StoreWrite::RecordSessionStart {
            session_id,
            kind,
            members: ids.clone(),
            at: unix_millis(),
        }]);
        tracing::info!(%session_id, %kind, a = %ids[0], b = %ids[1], "session created");
        Ok(handle)
    }

    /// Looks up a live session.
    pub fn get(&self, session_id: SessionId) -> Option<SessionHandle> {
        self.live.get(&session_id).map(|h| h.clone())
    }

    /// The session a client is currently in.
    pub fn session_of(&self, client_id: &ClientId) -> Option<SessionId> {
        self.members.get(client_id).map(|s| *s)
    }

    /// Takes a session out of both tables, exactly once.
    ///
    /// Once detached, no lookup can reach the session, so no relay
    /// traffic gets to it afterwards. The actor keeps running until the
    /// handle is passed to [`finalize`](Self::finalize); in between the
    /// caller can free the members while nobody has been told yet. A
    /// second call for the same session (or a call for an unknown one)
    /// returns `None`.
    pub fn detach(&self, session_id: SessionId) -> Option<SessionHandle> {
        let (_, handle) = self.live.remove(&session_id)?;
        for id in handle.members() {
            self.members.remove_if(id, |_, sid| *sid == session_id);
        }
        Some(handle)
    }

    /// Detaches whatever session `client_id` is in.
    pub fn detach_for(&self, client_id: &ClientId) -> Option<SessionHandle> {
        let session_id = self.session_of(client_id)?;
        self.detach(session_id)
    }

    /// Detaches every live session. Used on server shutdown.
    pub fn detach_all(&self) -> Vec<SessionHandle> {
        let ids: Vec<SessionId> = self.live.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter_map(|id| self.detach(id)).collect()
    }

    /// Tells a detached session's actor to end, and waits until it has
    /// notified the members and submitted its store writes.
    pub async fn finalize(&self, handle: SessionHandle, reason: EndReason) -> SessionSummary {
        let session_id = handle.session_id();
        match handle.end(reason).await {
            Ok(summary) => summary,
            Err(e) => {
                // The actor died; its ledger is lost.
                tracing::error!(%session_id, error = %e, "session actor gone before end");
                SessionSummary {
                    session_id,
                    kind: handle.kind(),
                    members: handle.members().clone(),
                    revealed: false,
                    coins: 0,
                }
            }
        }
    }

    /// Detaches and finalizes in one go.
    pub async fn end(&self, session_id: SessionId, reason: EndReason) -> Option<SessionSummary> {
        let handle = self.detach(session_id)?;
        Some(self.finalize(handle, reason).await)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Draws an unused id in `1..=SessionId::MAX_SAFE`.
    fn fresh_id(&self) -> SessionId {
        let mut rng = rand::rng();
        loop {
            let id = SessionId(rng.random_range(1..=SessionId::MAX_SAFE));
            if !self.live.contains_key(&id) {
                return id;
            }
        }
    }
}

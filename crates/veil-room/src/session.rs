//! Session actor: an isolated Tokio task that owns one two-party session.
//!
//! Each session runs in its own task, communicating with the outside
//! world through an mpsc channel. Relay traffic, the reveal handshake and
//! accrual ticks are all serialized through that one loop, so the
//! session's state has exactly one writer and needs no lock.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use veil_economy::{
    AccrualSchedule, Directive, SessionEconomy, SessionEvent, Settlement, StoreWrite, StoreWriter,
};
use veil_presence::Outbox;
use veil_protocol::{ClientId, RelayKind, ServerMessage, SessionId, SessionKind, unix_millis};

use crate::{SessionConfig, SessionError, SessionState};

/// One side of a session, as handed over by the lobby.
#[derive(Debug, Clone)]
pub struct Member {
    pub client_id: ClientId,
    pub display_name: String,
    pub outbox: Outbox,
}

/// Why a session is ending. Decides who hears what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The member's connection dropped. The other member gets
    /// `peer-disconnected`.
    PeerDisconnected(ClientId),
    /// The member sent `leave-session`. The other member gets
    /// `peer-disconnected`, the leaver `session-ended`.
    PeerLeft(ClientId),
    /// Server shutdown. Both members get `session-ended`.
    Shutdown,
}

/// Commands sent to a session actor through its channel.
///
/// Commands carrying a `from` are checked against the member list
/// inside the actor; anything from a non-member is dropped.
pub(crate) enum SessionCommand {
    /// Forward a negotiation payload to the other member.
    Relay {
        from: ClientId,
        kind: RelayKind,
        payload: serde_json::Value,
    },

    /// The sender's peer connection is up.
    Connected { from: ClientId },

    RevealRequest { from: ClientId },

    RevealAccept { from: ClientId },

    /// Broadcast a chat line to both members.
    Chat { from: ClientId, text: String },

    /// Request the current session info.
    GetInfo { reply: oneshot::Sender<SessionInfo> },

    /// Finalize and stop. The summary is sent once the actor has
    /// notified the members and submitted its store writes.
    End {
        reason: EndReason,
        reply: oneshot::Sender<SessionSummary>,
    },
}

/// A snapshot of a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub kind: SessionKind,
    pub state: SessionState,
    pub members: [ClientId; 2],
    /// Which members have an outstanding reveal request.
    pub reveal_requested: [bool; 2],
    /// Coins granted by this session so far (each member received this).
    pub coins: u64,
}

/// What remained of a session after it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub kind: SessionKind,
    pub members: [ClientId; 2],
    pub revealed: bool,
    pub coins: u64,
}

/// Handle to a running session actor. Used to send commands to it.
///
/// Cheap to clone: an `mpsc::Sender` plus a shared member list. The
/// member list is fixed at creation, so membership checks need no
/// round trip to the actor.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    kind: SessionKind,
    members: Arc<[ClientId; 2]>,
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn members(&self) -> &[ClientId; 2] {
        &self.members
    }

    pub fn is_member(&self, client_id: &ClientId) -> bool {
        self.members.contains(client_id)
    }

    /// Forwards a negotiation payload (fire-and-forget).
    pub async fn relay(
        &self,
        from: ClientId,
        kind: RelayKind,
        payload: serde_json::Value,
    ) -> Result<(), SessionError> {
        self.send(SessionCommand::Relay {
            from,
            kind,
            payload,
        })
        .await
    }

    /// Reports that `from`'s peer connection is established.
    pub async fn connected(&self, from: ClientId) -> Result<(), SessionError> {
        self.send(SessionCommand::Connected { from }).await
    }

    pub async fn reveal_request(&self, from: ClientId) -> Result<(), SessionError> {
        self.send(SessionCommand::RevealRequest { from }).await
    }

    pub async fn reveal_accept(&self, from: ClientId) -> Result<(), SessionError> {
        self.send(SessionCommand::RevealAccept { from }).await
    }

    pub async fn chat(&self, from: ClientId, text: String) -> Result<(), SessionError> {
        self.send(SessionCommand::Chat { from, text }).await
    }

    /// Requests the current session info.
    pub async fn get_info(&self) -> Result<SessionInfo, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SessionCommand::GetInfo { reply: reply_tx }).await?;
        reply_rx
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))
    }

    /// Ends the session and waits until the actor has finalized it.
    ///
    /// Only [`SessionManager::finalize`](crate::SessionManager::finalize)
    /// calls this, on a handle it already detached, which is what makes
    /// ending happen once.
    pub(crate) async fn end(&self, reason: EndReason) -> Result<SessionSummary, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SessionCommand::End {
            reason,
            reply: reply_tx,
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))
    }

    async fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| SessionError::Unavailable(self.session_id))
    }
}

/// The internal session actor state. Runs inside a Tokio task.
struct SessionActor {
    session_id: SessionId,
    kind: SessionKind,
    state: SessionState,
    members: [Member; 2],
    reveal_requested: [bool; 2],
    /// `None` for Friend sessions, which never earn.
    economy: Option<SessionEconomy>,
    schedule: AccrualSchedule,
    writer: StoreWriter,
    receiver: mpsc::Receiver<SessionCommand>,
}

impl SessionActor {
    /// Runs the actor loop until `End` or until every handle is gone.
    async fn run(mut self) {
        tracing::info!(session_id = %self.session_id, kind = %self.kind, "session actor started");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else {
                        tracing::warn!(
                            session_id = %self.session_id,
                            "all handles dropped without ending session"
                        );
                        break;
                    };
                    if let Some((reason, reply)) = self.handle_command(cmd) {
                        let summary = self.finish(reason);
                        let _ = reply.send(summary);
                        break;
                    }
                }
                tick = self.schedule.wait_for_tick() => {
                    self.economy_event(SessionEvent::Tick { at: tick.at });
                }
            }
        }

        tracing::info!(session_id = %self.session_id, "session actor stopped");
    }

    /// Handles one command. Returns the end request, if that is what it
    /// was, so the loop can finish outside the borrow.
    fn handle_command(
        &mut self,
        cmd: SessionCommand,
    ) -> Option<(EndReason, oneshot::Sender<SessionSummary>)> {
        match cmd {
            SessionCommand::Relay {
                from,
                kind,
                payload,
            } => self.handle_relay(from, kind, payload),
            SessionCommand::Connected { from } => self.handle_connected(from),
            SessionCommand::RevealRequest { from } => self.handle_reveal_request(from),
            SessionCommand::RevealAccept { from } => self.handle_reveal_accept(from),
            SessionCommand::Chat { from, text } => self.handle_chat(from, text),
            SessionCommand::GetInfo { reply } => {
                let _ = reply.send(self.info());
            }
            SessionCommand::End { reason, reply } => return Some((reason, reply)),
        }
        None
    }

    // -----------------------------------------------------------------
    // Relay
    // -----------------------------------------------------------------

    fn handle_relay(&mut self, from: ClientId, kind: RelayKind, payload: serde_json::Value) {
        let Some(idx) = self.member_index(&from) else {
            self.drop_stale(&from, "relay");
            return;
        };
        tracing::debug!(session_id = %self.session_id, %from, %kind, "relaying");
        let msg = kind.forward(self.session_id, from.clone(), payload);
        self.send_to(1 - idx, msg);

        // An answer closes the offer/answer exchange. Clients that never
        // send `connected` still leave Negotiating this way.
        if kind == RelayKind::Answer && self.state == SessionState::Negotiating {
            self.complete_negotiation(&from);
        }
    }

    fn handle_chat(&mut self, from: ClientId, text: String) {
        if self.member_index(&from).is_none() {
            self.drop_stale(&from, "chat");
            return;
        }
        self.broadcast(ServerMessage::Chat {
            session_id: self.session_id,
            from,
            text,
            sent_at: unix_millis(),
        });
    }

    // -----------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------

    fn handle_connected(&mut self, from: ClientId) {
        if self.member_index(&from).is_none() {
            self.drop_stale(&from, "connected");
            return;
        }
        if self.state != SessionState::Negotiating {
            tracing::debug!(session_id = %self.session_id, %from, state = %self.state, "duplicate connected ignored");
            return;
        }
        self.complete_negotiation(&from);
    }

    fn complete_negotiation(&mut self, from: &ClientId) {
        tracing::debug!(session_id = %self.session_id, %from, "negotiation complete");
        self.transition(SessionState::Connected);
        match self.kind {
            SessionKind::Random => {
                self.transition(SessionState::Concealed);
                self.economy_event(SessionEvent::Connected { at: Instant::now() });
            }
            SessionKind::Friend => self.transition(SessionState::Revealed),
        }
    }

    fn handle_reveal_request(&mut self, from: ClientId) {
        let Some(idx) = self.member_index(&from) else {
            self.drop_stale(&from, "reveal-request");
            return;
        };
        match self.state {
            SessionState::Concealed => {}
            SessionState::Negotiating => {
                tracing::debug!(
                    session_id = %self.session_id,
                    %from,
                    "reveal request before negotiation completed (no answer or connected yet), ignored"
                );
                return;
            }
            state => {
                tracing::debug!(session_id = %self.session_id, %from, %state, "reveal request ignored");
                return;
            }
        }
        if self.reveal_requested[idx] {
            return;
        }

        self.reveal_requested[idx] = true;
        tracing::info!(session_id = %self.session_id, %from, "reveal requested");
        self.send_to(
            1 - idx,
            ServerMessage::RevealRequested {
                session_id: self.session_id,
                from,
            },
        );
    }

    fn handle_reveal_accept(&mut self, from: ClientId) {
        let Some(idx) = self.member_index(&from) else {
            self.drop_stale(&from, "reveal-accept");
            return;
        };
        if self.state != SessionState::Concealed {
            tracing::debug!(session_id = %self.session_id, %from, state = %self.state, "reveal accept ignored");
            return;
        }
        // Only the member who did not ask can grant the request.
        if !self.reveal_requested[1 - idx] {
            tracing::debug!(session_id = %self.session_id, %from, "reveal accept without a request from the peer");
            return;
        }

        self.transition(SessionState::Revealed);
        self.broadcast(ServerMessage::Revealed {
            session_id: self.session_id,
        });

        let [a, b] = self.member_ids();
        self.writer.submit(vec![
            StoreWrite::RecordSessionReveal {
                session_id: self.session_id,
                at: unix_millis(),
            },
            StoreWrite::AddFriendLink { a, b },
        ]);
        self.economy_event(SessionEvent::Revealed);
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(self.state.can_transition_to(next), "{} -> {next}", self.state);
        tracing::info!(session_id = %self.session_id, from = %self.state, to = %next, "session state changed");
        self.state = next;
    }

    // -----------------------------------------------------------------
    // Economy
    // -----------------------------------------------------------------

    fn economy_event(&mut self, event: SessionEvent) {
        let Some(economy) = self.economy.as_mut() else {
            return;
        };
        let settlement = economy.dispatch(event);
        self.settle(settlement);
    }

    fn settle(&mut self, settlement: Settlement) {
        match settlement.directive {
            Directive::Start => self.schedule.start(Instant::now()),
            Directive::Stop => self.schedule.cancel(),
            Directive::Keep => {}
        }
        self.writer.submit(settlement.writes);
        if let Some(award) = settlement.award {
            tracing::debug!(
                session_id = %self.session_id,
                amount = award.amount,
                total = award.total,
                "coins awarded"
            );
            self.broadcast(ServerMessage::CoinsAwarded {
                session_id: self.session_id,
                amount: award.amount,
                total: award.total,
            });
        }
    }

    // -----------------------------------------------------------------
    // Ending
    // -----------------------------------------------------------------

    fn finish(&mut self, reason: EndReason) -> SessionSummary {
        let revealed = self.state == SessionState::Revealed;
        self.transition(SessionState::Ended);
        self.schedule.cancel();

        self.writer.submit(vec![StoreWrite::RecordSessionEnd {
            session_id: self.session_id,
            at: unix_millis(),
        }]);
        self.economy_event(SessionEvent::Ended);

        let session_id = self.session_id;
        match &reason {
            EndReason::PeerDisconnected(gone) => {
                if let Some(idx) = self.member_index(gone) {
                    self.send_to(1 - idx, ServerMessage::PeerDisconnected { session_id });
                }
            }
            EndReason::PeerLeft(leaver) => {
                if let Some(idx) = self.member_index(leaver) {
                    self.send_to(1 - idx, ServerMessage::PeerDisconnected { session_id });
                    self.send_to(idx, ServerMessage::SessionEnded { session_id });
                }
            }
            EndReason::Shutdown => self.broadcast(ServerMessage::SessionEnded { session_id }),
        }

        tracing::info!(%session_id, ?reason, revealed, "session ended");

        SessionSummary {
            session_id,
            kind: self.kind,
            members: self.member_ids(),
            revealed,
            coins: self.coins(),
        }
    }

    // -----------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------

    fn member_index(&self, client_id: &ClientId) -> Option<usize> {
        self.members.iter().position(|m| &m.client_id == client_id)
    }

    fn member_ids(&self) -> [ClientId; 2] {
        [
            self.members[0].client_id.clone(),
            self.members[1].client_id.clone(),
        ]
    }

    fn coins(&self) -> u64 {
        self.economy
            .as_ref()
            .map_or(0, |e| e.state().total_granted)
    }

    fn drop_stale(&self, from: &ClientId, what: &str) {
        tracing::debug!(session_id = %self.session_id, %from, what, "dropping message from non-member");
    }

    /// Sends to one member. Silently drops if its connection is gone.
    fn send_to(&self, idx: usize, msg: ServerMessage) {
        let _ = self.members[idx].outbox.send(msg);
    }

    fn broadcast(&self, msg: ServerMessage) {
        self.send_to(0, msg.clone());
        self.send_to(1, msg);
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id,
            kind: self.kind,
            state: self.state,
            members: self.member_ids(),
            reveal_requested: self.reveal_requested,
            coins: self.coins(),
        }
    }
}

/// Spawns a new session actor task and returns a handle to it.
///
/// `config.channel_size` controls backpressure: if the channel fills up,
/// senders wait (bounded channel).
pub(crate) fn spawn_session(
    session_id: SessionId,
    kind: SessionKind,
    members: [Member; 2],
    config: &SessionConfig,
    writer: StoreWriter,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(config.channel_size.max(1));
    let ids = [members[0].client_id.clone(), members[1].client_id.clone()];

    let economy = match kind {
        SessionKind::Random => Some(SessionEconomy::new(
            config.economy.clone(),
            session_id,
            ids.clone(),
        )),
        SessionKind::Friend => None,
    };

    let actor = SessionActor {
        session_id,
        kind,
        state: SessionState::Negotiating,
        members,
        reveal_requested: [false; 2],
        economy,
        schedule: AccrualSchedule::new(&config.economy),
        writer,
        receiver: rx,
    };

    tokio::spawn(actor.run());

    SessionHandle {
        session_id,
        kind,
        members: Arc::new(ids),
        sender: tx,
    }
}

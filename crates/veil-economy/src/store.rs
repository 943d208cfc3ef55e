//! The persistent-store interface.
//!
//! The relay never reads session state back from the store; it only
//! pushes increments and records. Every write is described by a
//! [`StoreWrite`] value so it can be queued, retried and asserted on in
//! tests without touching a real backend.

use async_trait::async_trait;
use serde::Serialize;
use veil_protocol::{ClientId, SessionId, SessionKind};

/// Errors a store backend may report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The addressed document does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Lifetime counters for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub coins: u64,
    pub total_sessions: u64,
    pub total_reveals: u64,
}

/// A member's complaint about the other party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub session_id: SessionId,
    pub reporter: ClientId,
    pub reported: ClientId,
    pub reason: String,
    pub description: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

/// Persistence operations the relay relies on.
///
/// Increments must be additive on the backend so that at-least-once
/// delivery only ever over-counts, never loses updates to a concurrent
/// writer.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get_user_stats(&self, user: &ClientId) -> Result<UserStats, StoreError>;

    async fn increment_coins(&self, user: &ClientId, amount: u64) -> Result<(), StoreError>;

    async fn increment_session_coins(
        &self,
        session_id: SessionId,
        amount: u64,
    ) -> Result<(), StoreError>;

    async fn increment_session_count(&self, user: &ClientId) -> Result<(), StoreError>;

    async fn increment_reveal_count(&self, user: &ClientId) -> Result<(), StoreError>;

    async fn record_session_start(
        &self,
        session_id: SessionId,
        kind: SessionKind,
        members: [ClientId; 2],
        at: u64,
    ) -> Result<(), StoreError>;

    async fn record_session_reveal(&self, session_id: SessionId, at: u64)
    -> Result<(), StoreError>;

    async fn record_session_end(&self, session_id: SessionId, at: u64) -> Result<(), StoreError>;

    async fn add_friend_link(&self, a: &ClientId, b: &ClientId) -> Result<(), StoreError>;

    async fn create_report(&self, report: Report) -> Result<(), StoreError>;
}

/// A single deferred store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    IncrementCoins { user: ClientId, amount: u64 },
    IncrementSessionCoins { session_id: SessionId, amount: u64 },
    IncrementSessionCount { user: ClientId },
    IncrementRevealCount { user: ClientId },
    RecordSessionStart {
        session_id: SessionId,
        kind: SessionKind,
        members: [ClientId; 2],
        at: u64,
    },
    RecordSessionReveal { session_id: SessionId, at: u64 },
    RecordSessionEnd { session_id: SessionId, at: u64 },
    AddFriendLink { a: ClientId, b: ClientId },
    CreateReport(Report),
}

impl StoreWrite {
    /// Performs this write against `store`.
    pub async fn apply(&self, store: &dyn Store) -> Result<(), StoreError> {
        match self {
            Self::IncrementCoins { user, amount } => store.increment_coins(user, *amount).await,
            Self::IncrementSessionCoins { session_id, amount } => {
                store.increment_session_coins(*session_id, *amount).await
            }
            Self::IncrementSessionCount { user } => store.increment_session_count(user).await,
            Self::IncrementRevealCount { user } => store.increment_reveal_count(user).await,
            Self::RecordSessionStart {
                session_id,
                kind,
                members,
                at,
            } => {
                store
                    .record_session_start(*session_id, *kind, members.clone(), *at)
                    .await
            }
            Self::RecordSessionReveal { session_id, at } => {
                store.record_session_reveal(*session_id, *at).await
            }
            Self::RecordSessionEnd { session_id, at } => {
                store.record_session_end(*session_id, *at).await
            }
            Self::AddFriendLink { a, b } => store.add_friend_link(a, b).await,
            Self::CreateReport(report) => store.create_report(report.clone()).await,
        }
    }

    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::IncrementCoins { .. } => "increment_coins",
            Self::IncrementSessionCoins { .. } => "increment_session_coins",
            Self::IncrementSessionCount { .. } => "increment_session_count",
            Self::IncrementRevealCount { .. } => "increment_reveal_count",
            Self::RecordSessionStart { .. } => "record_session_start",
            Self::RecordSessionReveal { .. } => "record_session_reveal",
            Self::RecordSessionEnd { .. } => "record_session_end",
            Self::AddFriendLink { .. } => "add_friend_link",
            Self::CreateReport(_) => "create_report",
        }
    }
}

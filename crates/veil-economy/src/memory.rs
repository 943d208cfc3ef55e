//! In-memory [`Store`] for development and tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use veil_protocol::{ClientId, SessionId, SessionKind};

use crate::{Report, Store, StoreError, UserStats};

/// What the store knows about one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub kind: SessionKind,
    pub members: [ClientId; 2],
    pub started_at: u64,
    pub revealed_at: Option<u64>,
    pub ended_at: Option<u64>,
    pub coins: u64,
}

/// A [`Store`] backed by concurrent maps.
///
/// [`fail_next`](Self::fail_next) makes the next N calls fail with
/// [`StoreError::Unavailable`], which is how retry behaviour is tested.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<ClientId, UserStats>,
    sessions: DashMap<SessionId, SessionRecord>,
    friends: DashMap<ClientId, BTreeSet<ClientId>>,
    reports: Mutex<Vec<Report>>,
    failures: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` store calls (reads or writes) fail.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Synchronous snapshot of a user's counters.
    pub fn stats(&self, user: &ClientId) -> UserStats {
        self.users.get(user).map(|s| *s).unwrap_or_default()
    }

    pub fn session(&self, session_id: SessionId) -> Option<SessionRecord> {
        self.sessions.get(&session_id).map(|r| r.clone())
    }

    pub fn friends_of(&self, user: &ClientId) -> Vec<ClientId> {
        self.friends
            .get(user)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn reports(&self) -> Vec<Report> {
        self.reports.lock().await.clone()
    }

    fn check_failure(&self) -> Result<(), StoreError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(StoreError::Unavailable("injected failure".into())),
            Err(_) => Ok(()),
        }
    }

    fn update_user(&self, user: &ClientId, f: impl FnOnce(&mut UserStats)) {
        f(&mut self.users.entry(user.clone()).or_default());
    }

    fn update_session(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&mut SessionRecord),
    ) -> Result<(), StoreError> {
        let mut record = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        f(&mut record);
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user_stats(&self, user: &ClientId) -> Result<UserStats, StoreError> {
        self.check_failure()?;
        Ok(self.stats(user))
    }

    async fn increment_coins(&self, user: &ClientId, amount: u64) -> Result<(), StoreError> {
        self.check_failure()?;
        self.update_user(user, |s| s.coins += amount);
        Ok(())
    }

    async fn increment_session_coins(
        &self,
        session_id: SessionId,
        amount: u64,
    ) -> Result<(), StoreError> {
        self.check_failure()?;
        self.update_session(session_id, |r| r.coins += amount)
    }

    async fn increment_session_count(&self, user: &ClientId) -> Result<(), StoreError> {
        self.check_failure()?;
        self.update_user(user, |s| s.total_sessions += 1);
        Ok(())
    }

    async fn increment_reveal_count(&self, user: &ClientId) -> Result<(), StoreError> {
        self.check_failure()?;
        self.update_user(user, |s| s.total_reveals += 1);
        Ok(())
    }

    async fn record_session_start(
        &self,
        session_id: SessionId,
        kind: SessionKind,
        members: [ClientId; 2],
        at: u64,
    ) -> Result<(), StoreError> {
        self.check_failure()?;
        self.sessions.insert(
            session_id,
            SessionRecord {
                kind,
                members,
                started_at: at,
                revealed_at: None,
                ended_at: None,
                coins: 0,
            },
        );
        Ok(())
    }

    async fn record_session_reveal(
        &self,
        session_id: SessionId,
        at: u64,
    ) -> Result<(), StoreError> {
        self.check_failure()?;
        self.update_session(session_id, |r| r.revealed_at = Some(at))
    }

    async fn record_session_end(&self, session_id: SessionId, at: u64) -> Result<(), StoreError> {
        self.check_failure()?;
        self.update_session(session_id, |r| r.ended_at = Some(at))
    }

    async fn add_friend_link(&self, a: &ClientId, b: &ClientId) -> Result<(), StoreError> {
        self.check_failure()?;
        self.friends.entry(a.clone()).or_default().insert(b.clone());
        self.friends.entry(b.clone()).or_default().insert(a.clone());
        Ok(())
    }

    async fn create_report(&self, report: Report) -> Result<(), StoreError> {
        self.check_failure()?;
        self.reports.lock().await.push(report);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(id: &str) -> ClientId {
        ClientId::from(id)
    }

    #[tokio::test]
    async fn test_unknown_user_has_zero_stats() {
        let store = MemoryStore::new();
        let stats = store.get_user_stats(&cid("nobody")).await.unwrap();
        assert_eq!(stats, UserStats::default());
    }

    #[tokio::test]
    async fn test_increments_accumulate() {
        let store = MemoryStore::new();
        store.increment_coins(&cid("a"), 3).await.unwrap();
        store.increment_coins(&cid("a"), 15).await.unwrap();
        store.increment_session_count(&cid("a")).await.unwrap();
        store.increment_reveal_count(&cid("a")).await.unwrap();

        assert_eq!(
            store.stats(&cid("a")),
            UserStats {
                coins: 18,
                total_sessions: 1,
                total_reveals: 1
            }
        );
    }

    #[tokio::test]
    async fn test_session_lifecycle_record() {
        let store = MemoryStore::new();
        let id = SessionId(7);
        store
            .record_session_start(id, SessionKind::Random, [cid("a"), cid("b")], 100)
            .await
            .unwrap();
        store.increment_session_coins(id, 2).await.unwrap();
        store.record_session_reveal(id, 200).await.unwrap();
        store.record_session_end(id, 300).await.unwrap();

        let record = store.session(id).unwrap();
        assert_eq!(record.coins, 2);
        assert_eq!(record.revealed_at, Some(200));
        assert_eq!(record.ended_at, Some(300));
    }

    #[tokio::test]
    async fn test_session_update_before_start_is_not_found() {
        let store = MemoryStore::new();
        let err = store.record_session_end(SessionId(1), 5).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_friend_link_is_symmetric() {
        let store = MemoryStore::new();
        store.add_friend_link(&cid("a"), &cid("b")).await.unwrap();
        store.add_friend_link(&cid("b"), &cid("a")).await.unwrap();

        assert_eq!(store.friends_of(&cid("a")), vec![cid("b")]);
        assert_eq!(store.friends_of(&cid("b")), vec![cid("a")]);
    }

    #[tokio::test]
    async fn test_fail_next_fails_exactly_n_writes() {
        let store = MemoryStore::new();
        store.fail_next(2);

        assert!(store.increment_coins(&cid("a"), 1).await.is_err());
        assert!(store.increment_coins(&cid("a"), 1).await.is_err());
        assert!(store.increment_coins(&cid("a"), 1).await.is_ok());
        assert_eq!(store.stats(&cid("a")).coins, 1);
    }
}

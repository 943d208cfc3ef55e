//! Background submission of store writes.
//!
//! Session actors must never wait on the store, so writes are handed to a
//! spawned task. Within one batch the writes are applied in order; each
//! one is retried with exponential backoff and then given up on.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::{Store, StoreError, StoreWrite};

/// How hard to try before abandoning a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX))
    }
}

/// Shared handle that applies [`StoreWrite`]s off the caller's task.
#[derive(Clone)]
pub struct StoreWriter {
    store: Arc<dyn Store>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for StoreWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreWriter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl StoreWriter {
    pub fn new(store: Arc<dyn Store>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// The underlying store, for reads.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Applies `writes` in order on a spawned task and returns at once.
    ///
    /// The returned handle is only useful to tests; production callers
    /// drop it.
    pub fn submit(&self, writes: Vec<StoreWrite>) -> Option<JoinHandle<()>> {
        if writes.is_empty() {
            return None;
        }
        let writer = self.clone();
        Some(tokio::spawn(async move {
            for write in &writes {
                // Failures are logged inside; keep going with the batch.
                let _ = writer.apply(write).await;
            }
        }))
    }

    /// Applies one write with retries, returning the last error if every
    /// attempt failed.
    pub async fn apply(&self, write: &StoreWrite) -> Result<(), StoreError> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match write.apply(self.store.as_ref()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        op = write.name(),
                        attempt,
                        retry_in = ?delay,
                        error = %e,
                        "store write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(op = write.name(), attempts, error = %e, "store write abandoned");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use veil_protocol::ClientId;

    use super::*;
    use crate::MemoryStore;

    fn writer(store: &Arc<MemoryStore>) -> StoreWriter {
        StoreWriter::new(store.clone(), RetryPolicy::default())
    }

    fn coins(user: &str, amount: u64) -> StoreWrite {
        StoreWrite::IncrementCoins {
            user: ClientId::from(user),
            amount,
        }
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_retries_until_success() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(2);

        writer(&store).apply(&coins("a", 5)).await.unwrap();
        assert_eq!(store.stats(&ClientId::from("a")).coins, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_gives_up_after_attempts() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(3);

        let err = writer(&store).apply(&coins("a", 5)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.stats(&ClientId::from("a")).coins, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_applies_batch_in_background() {
        let store = Arc::new(MemoryStore::new());

        let handle = writer(&store)
            .submit(vec![coins("a", 1), coins("b", 2), coins("a", 3)])
            .unwrap();
        handle.await.unwrap();

        assert_eq!(store.stats(&ClientId::from("a")).coins, 4);
        assert_eq!(store.stats(&ClientId::from("b")).coins, 2);
    }

    #[tokio::test]
    async fn test_submit_empty_batch_spawns_nothing() {
        let store = Arc::new(MemoryStore::new());
        assert!(writer(&store).submit(Vec::new()).is_none());
    }
}

//! Cluster-wide mutual exclusion per limiter key.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Errors reported by a [`PermitLock`] backend.
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    /// The lock was not obtained within the backend's acquisition timeout.
    #[error("lock for {key} timed out after {waited:?}")]
    Timeout {
        /// Key whose lock was requested.
        key: String,
        /// How long the caller waited.
        waited: Duration,
    },
    /// The backend failed or rejected the request.
    #[error("lock backend error for {key}: {reason}")]
    Backend {
        /// Key whose lock was requested.
        key: String,
        /// Backend-specific reason.
        reason: String,
    },
}

impl LockError {
    /// Key the failed request was for.
    pub fn key(&self) -> &str {
        match self {
            Self::Timeout { key, .. } | Self::Backend { key, .. } => key,
        }
    }
}

/// Proof of holding the lock for one key, handed back on release.
///
/// Backends attach whatever they need to release the lock: an opaque ownership handle (e.g.
/// the etcd lock key), a lease id, or an in-process permit that also releases on drop.
#[derive(Debug)]
pub struct LockToken {
    key: String,
    handle: Vec<u8>,
    lease: Option<i64>,
    local: Option<OwnedSemaphorePermit>,
}

impl LockToken {
    /// Token for `key` carrying a backend ownership handle.
    pub fn new(key: impl Into<String>, handle: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into(), handle: handle.into(), lease: None, local: None }
    }

    /// Attach the lease backing this lock.
    pub fn with_lease(mut self, lease: i64) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn handle(&self) -> &[u8] {
        &self.handle
    }

    pub fn lease(&self) -> Option<i64> {
        self.lease
    }
}

/// Cluster-wide lock keyed by limiter id.
///
/// At most one holder per key at any instant. Every read-modify-write of a bucket happens
/// between `acquire` and `release`.
#[async_trait]
pub trait PermitLock: Send + Sync + std::fmt::Debug {
    /// Block until the lock for `key` is held, or fail per the backend's policy.
    async fn acquire(&self, key: &str) -> Result<LockToken, LockError>;

    /// Release a lock obtained from [`PermitLock::acquire`].
    async fn release(&self, token: LockToken) -> Result<(), LockError>;
}

/// In-process lock: one single-permit semaphore per key.
///
/// Only excludes handles sharing this value (clones share it), so it suits tests and
/// single-process deployments. A token dropped without `release` (e.g. a cancelled caller) still
/// frees the key, though its slot is only forgotten after the next `release` on that key.
/// Slots are dropped once released with no waiters, so per-tenant keys do not accumulate.
#[derive(Debug, Clone, Default)]
pub struct LocalLock {
    slots: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
    timeout: Option<Duration>,
}

impl LocalLock {
    /// Lock that waits indefinitely.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`LockError::Timeout`] after waiting `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether some caller currently holds `key`.
    pub fn is_held(&self, key: &str) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .is_some_and(|slot| slot.available_permits() == 0)
    }

    /// Number of keys with a live slot (held, awaited, or dropped without release).
    pub fn tracked_keys(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn slot(&self, key: &str) -> Arc<Semaphore> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(key.to_string()).or_insert_with(|| Arc::new(Semaphore::new(1))).clone()
    }
}

#[async_trait]
impl PermitLock for LocalLock {
    async fn acquire(&self, key: &str) -> Result<LockToken, LockError> {
        let slot = self.slot(key);
        let acquired = match self.timeout {
            Some(waited) => tokio::time::timeout(waited, slot.acquire_owned())
                .await
                .map_err(|_| LockError::Timeout { key: key.to_string(), waited })?,
            None => slot.acquire_owned().await,
        };
        let permit = acquired
            .map_err(|e| LockError::Backend { key: key.to_string(), reason: e.to_string() })?;
        let mut token = LockToken::new(key, Vec::new());
        token.local = Some(permit);
        Ok(token)
    }

    async fn release(&self, mut token: LockToken) -> Result<(), LockError> {
        let Some(permit) = token.local.take() else {
            return Err(LockError::Backend {
                key: token.key,
                reason: "token was not issued by a local lock".into(),
            });
        };
        drop(permit);
        // Forget the slot once nobody holds or waits on it. Waiters clone the slot under the
        // same map lock, so a count of one means the map owns the only reference.
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.get(&token.key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(&token.key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn excludes_second_holder_until_release() {
        let lock = LocalLock::new().with_timeout(Duration::from_millis(20));
        let token = lock.acquire("k").await.unwrap();
        assert!(lock.is_held("k"));

        let err = lock.acquire("k").await.unwrap_err();
        assert!(matches!(err, LockError::Timeout { ref key, .. } if key == "k"));

        lock.release(token).await.unwrap();
        assert!(!lock.is_held("k"));
        let again = lock.acquire("k").await.unwrap();
        lock.release(again).await.unwrap();
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let lock = LocalLock::new().with_timeout(Duration::from_millis(20));
        let a = lock.acquire("a").await.unwrap();
        let b = lock.acquire("b").await.unwrap();
        lock.release(a).await.unwrap();
        lock.release(b).await.unwrap();
    }

    #[tokio::test]
    async fn released_keys_are_forgotten() {
        let lock = LocalLock::new().with_timeout(Duration::from_millis(20));
        for tenant in 0..100 {
            let token = lock.acquire(&format!("tenant-{tenant}")).await.unwrap();
            lock.release(token).await.unwrap();
        }
        assert_eq!(lock.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn slot_with_a_waiter_survives_release() {
        let lock = LocalLock::new();
        let first = lock.acquire("k").await.unwrap();
        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire("k").await })
        };
        // map + held permit + ours, then the waiter's clone
        let slot = lock.slot("k");
        while Arc::strong_count(&slot) < 4 {
            tokio::task::yield_now().await;
        }
        drop(slot);
        lock.release(first).await.unwrap();
        assert_eq!(lock.tracked_keys(), 1);

        let second = waiter.await.unwrap().unwrap();
        assert!(lock.is_held("k"));
        lock.release(second).await.unwrap();
        assert_eq!(lock.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn dropped_token_frees_the_key() {
        let lock = LocalLock::new().with_timeout(Duration::from_millis(20));
        drop(lock.acquire("k").await.unwrap());
        assert!(!lock.is_held("k"));
    }

    #[tokio::test]
    async fn foreign_token_is_rejected() {
        let lock = LocalLock::new();
        let err = lock.release(LockToken::new("k", b"remote".to_vec()).with_lease(7)).await;
        assert!(matches!(err, Err(LockError::Backend { .. })));
    }
}

//! etcd backends for `smoothgate` (companion crate).
//! Bring your own `etcd_client::Client`; enable the `etcd-client` feature.
//!
//! - [`EtcdPermitStore`] keeps each bucket as JSON under `prefix/<key>`, attached to a lease whose
//!   TTL is the record's expiry, so idle buckets vanish on their own.
//! - [`EtcdLock`] uses etcd's lock service under `prefix/lock/<key>`, held on a short lease so a
//!   crashed holder cannot wedge the bucket.

#![cfg(feature = "etcd-client")]

use async_trait::async_trait;
use etcd_client::{Client, LockOptions, PutOptions};
use smoothgate::rate_limit::store::{decode, encode};
use smoothgate::{LockError, LockToken, PermitLock, PermitState, PermitStore, StoreError};
use std::time::Duration;

/// Normalize and validate a key prefix.
fn normalize_prefix(prefix: String) -> Result<String, String> {
    let p = prefix.trim().trim_end_matches('/').to_string();
    if p.is_empty() {
        return Err("prefix cannot be empty".to_string());
    }
    if p.chars().any(|c| c.is_control()) {
        return Err("prefix cannot contain control characters".to_string());
    }
    Ok(p)
}

fn lease_seconds(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX)
}

/// Lease left behind by an overwrite. etcd reports lease `0` for a key written without one.
fn superseded_lease(previous: Option<i64>, current: i64) -> Option<i64> {
    previous.filter(|&id| id != 0 && id != current)
}

/// Revoke a lease nothing should be using any more; failures are logged, not surfaced.
async fn revoke_lease(client: &mut Client, lease_id: i64, key: &str, purpose: &'static str) {
    if let Err(e) = client.lease_revoke(lease_id).await {
        tracing::warn!(
            target: "smoothgate::etcd",
            key,
            lease_id,
            purpose,
            error = %e,
            "failed to revoke lease"
        );
    }
}

/// Permit store backed by etcd.
#[derive(Clone)]
pub struct EtcdPermitStore {
    prefix: String,
    client: Client,
}

impl std::fmt::Debug for EtcdPermitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdPermitStore")
            .field("prefix", &self.prefix)
            .field("client", &"<etcd_client::Client>")
            .finish()
    }
}

impl EtcdPermitStore {
    /// Create a store using an existing etcd client; buckets live at `prefix/<key>`.
    ///
    /// # Errors
    /// Returns `Err` if the prefix is empty or contains control characters.
    pub fn new(prefix: impl Into<String>, client: Client) -> Result<Self, String> {
        Ok(Self { prefix: normalize_prefix(prefix.into())?, client })
    }

    fn record_key(&self, key: &str) -> String {
        format!("{}/{}", self.prefix, key)
    }
}

#[async_trait]
impl PermitStore for EtcdPermitStore {
    async fn get(&self, key: &str) -> Result<Option<PermitState>, StoreError> {
        let mut client = self.client.clone();
        let resp = client
            .get(self.record_key(key), None)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        match resp.kvs().first() {
            Some(kv) => decode(kv.value()).map(Some),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, state: &PermitState, ttl: Duration) -> Result<(), StoreError> {
        let value = encode(state)?;
        let mut client = self.client.clone();
        let lease_id = client
            .lease_grant(lease_seconds(ttl), None)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .id();
        let options = PutOptions::new().with_lease(lease_id).with_prev_key();
        match client.put(self.record_key(key), value, Some(options)).await {
            Ok(resp) => {
                // The record moved to the new lease; the old one now holds nothing.
                let stale = superseded_lease(resp.prev_key().map(|kv| kv.lease()), lease_id);
                if let Some(stale) = stale {
                    revoke_lease(&mut client, stale, key, "record").await;
                }
                Ok(())
            }
            Err(e) => {
                revoke_lease(&mut client, lease_id, key, "record").await;
                Err(StoreError::Unavailable(e.to_string()))
            }
        }
    }
}

/// Cluster lock backed by etcd's lock service.
///
/// A token dropped without [`PermitLock::release`] (e.g. a limiter call cancelled while it holds
/// the lock) cannot be unlocked from `Drop`, so the key stays locked until the lease expires.
/// Keep [`EtcdLock::with_lease_ttl`] short when callers are routinely cancelled.
#[derive(Clone)]
pub struct EtcdLock {
    prefix: String,
    client: Client,
    lease_ttl: Duration,
    acquire_timeout: Duration,
}

impl std::fmt::Debug for EtcdLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdLock")
            .field("prefix", &self.prefix)
            .field("lease_ttl", &self.lease_ttl)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("client", &"<etcd_client::Client>")
            .finish()
    }
}

impl EtcdLock {
    /// Lock names are `prefix/lock/<key>`. Defaults: 10s lease, 5s acquisition timeout.
    ///
    /// # Errors
    /// Returns `Err` if the prefix is empty or contains control characters.
    pub fn new(prefix: impl Into<String>, client: Client) -> Result<Self, String> {
        Ok(Self {
            prefix: normalize_prefix(prefix.into())?,
            client,
            lease_ttl: Duration::from_secs(10),
            acquire_timeout: Duration::from_secs(5),
        })
    }

    /// Lease backing each held lock; a holder that dies is released after this long.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Give up acquiring after `timeout`.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    fn lock_name(&self, key: &str) -> String {
        format!("{}/lock/{}", self.prefix, key)
    }
}

#[async_trait]
impl PermitLock for EtcdLock {
    async fn acquire(&self, key: &str) -> Result<LockToken, LockError> {
        let backend = |e: etcd_client::Error| LockError::Backend {
            key: key.to_string(),
            reason: e.to_string(),
        };
        let mut client = self.client.clone();
        let lease = client.lease_grant(lease_seconds(self.lease_ttl), None).await.map_err(backend)?;
        let lease_id = lease.id();

        let locked = tokio::time::timeout(
            self.acquire_timeout,
            client.lock(self.lock_name(key), Some(LockOptions::new().with_lease(lease_id))),
        )
        .await;
        match locked {
            Ok(Ok(resp)) => Ok(LockToken::new(key, resp.key().to_vec()).with_lease(lease_id)),
            Ok(Err(e)) => {
                revoke_lease(&mut client, lease_id, key, "lock").await;
                Err(backend(e))
            }
            Err(_) => {
                revoke_lease(&mut client, lease_id, key, "lock").await;
                Err(LockError::Timeout { key: key.to_string(), waited: self.acquire_timeout })
            }
        }
    }

    async fn release(&self, token: LockToken) -> Result<(), LockError> {
        let mut client = self.client.clone();
        let unlocked = client.unlock(token.handle().to_vec()).await;
        if let Some(lease_id) = token.lease() {
            revoke_lease(&mut client, lease_id, token.key(), "lock").await;
        }
        unlocked
            .map(|_| ())
            .map_err(|e| LockError::Backend { key: token.key().to_string(), reason: e.to_string() })
    }
}

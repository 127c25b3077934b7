use crate::clock::{Clock, SystemClock};
use crate::rate_limit::permits::PermitState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Errors reported by a [`PermitStore`] backend.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The backend could not be reached or timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A record could not be encoded or decoded.
    #[error("malformed permit record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Abstract storage interface for bucket state.
///
/// Backends hold one [`PermitState`] per limiter key. Callers only touch the store while holding
/// the key's lock, so no compare-and-set is needed here.
#[async_trait]
pub trait PermitStore: Send + Sync + std::fmt::Debug {
    /// Fetch the state for `key`, or `None` if it has never been written or has expired.
    async fn get(&self, key: &str) -> Result<Option<PermitState>, StoreError>;

    /// Write the state for `key`, replacing its expiry with `ttl`.
    async fn set(&self, key: &str, state: &PermitState, ttl: Duration) -> Result<(), StoreError>;
}

/// Encode a record in the wire format shared by all bundled backends (JSON).
pub fn encode(state: &PermitState) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(state)?)
}

/// Decode a record written by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<PermitState, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    expires_at_micros: i64,
}

/// In-memory permit store.
///
/// Records are kept encoded, exactly as a network store would see them, and expire by their TTL
/// against the store's clock. Clones share the same records.
#[derive(Clone, Debug)]
pub struct InMemoryPermitStore {
    data: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryPermitStore {
    fn default() -> Self {
        Self { data: Arc::default(), clock: Arc::new(SystemClock) }
    }
}

impl InMemoryPermitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire records against `clock` instead of the wall clock.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Store raw bytes under `key`, bypassing encoding.
    pub fn raw_put(&self, key: &str, bytes: impl Into<Vec<u8>>, ttl: Duration) {
        let entry = Entry { bytes: bytes.into(), expires_at_micros: self.expiry(ttl) };
        self.entries().insert(key.to_string(), entry);
    }

    /// Decode the live record for `key` without touching its expiry.
    pub fn peek(&self, key: &str) -> Option<PermitState> {
        let now = self.clock.now_micros();
        let guard = self.entries();
        guard
            .get(key)
            .filter(|entry| entry.expires_at_micros > now)
            .and_then(|entry| decode(&entry.bytes).ok())
    }

    /// Remaining time to live for `key`, if present.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now_micros();
        let guard = self.entries();
        let remaining = guard.get(key)?.expires_at_micros.saturating_sub(now);
        (remaining > 0).then(|| Duration::from_micros(remaining as u64))
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = self.clock.now_micros();
        self.entries().values().filter(|entry| entry.expires_at_micros > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expiry(&self, ttl: Duration) -> i64 {
        let ttl_micros = i64::try_from(ttl.as_micros()).unwrap_or(i64::MAX);
        self.clock.now_micros().saturating_add(ttl_micros)
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PermitStore for InMemoryPermitStore {
    async fn get(&self, key: &str) -> Result<Option<PermitState>, StoreError> {
        let now = self.clock.now_micros();
        let mut guard = self.entries();
        match guard.get(key) {
            Some(entry) if entry.expires_at_micros > now => decode(&entry.bytes).map(Some),
            Some(_) => {
                guard.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, state: &PermitState, ttl: Duration) -> Result<(), StoreError> {
        let bytes = encode(state)?;
        let entry = Entry { bytes, expires_at_micros: self.expiry(ttl) };
        self.entries().insert(key.to_string(), entry);
        Ok(())
    }
}

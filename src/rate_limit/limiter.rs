//! The distributed smooth rate limiter.
//!
//! Semantics:
//! - Every read-modify-write of a bucket happens while holding the key's [`PermitLock`]; the
//!   lock is released on every exit path before any sleeping happens.
//! - A reservation returns the wait owed for capacity reserved *before* it and pushes its own
//!   cost onto the next free ticket, which the next caller pays.
//! - A declined `try_acquire` writes nothing.
//!
//! Example
//! ```rust
//! use smoothgate::{InMemoryPermitStore, LimiterContext, LocalLock, RateLimiter};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let ctx = LimiterContext::new("api:search", InMemoryPermitStore::new(), LocalLock::new());
//! let limiter = RateLimiter::bursty(ctx, 100.0, 1.0).unwrap();
//! let waited = limiter.acquire(1).await.unwrap();
//! assert!(waited.is_zero());
//! # });
//! ```

use crate::adaptive::DynamicConfig;
use crate::clock::{Clock, SystemClock};
use crate::config::{validate_rate, InitialFill, LimiterConfig};
use crate::error::LimiterError;
use crate::rate_limit::lock::PermitLock;
use crate::rate_limit::permits::PermitState;
use crate::rate_limit::store::{PermitStore, StoreError};
use crate::rate_limit::strategies::SmoothingStrategy;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Everything a limiter operation touches: the bucket key and its collaborators.
#[derive(Clone)]
pub struct LimiterContext {
    key: String,
    store: Arc<dyn PermitStore>,
    lock: Arc<dyn PermitLock>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for LimiterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterContext")
            .field("key", &self.key)
            .field("store", &self.store)
            .field("lock", &self.lock)
            .field("clock", &self.clock)
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl LimiterContext {
    /// Context for `key` using the wall clock and tokio sleeping.
    pub fn new<S, L>(key: impl Into<String>, store: S, lock: L) -> Self
    where
        S: PermitStore + 'static,
        L: PermitLock + 'static,
    {
        Self {
            key: key.into(),
            store: Arc::new(store),
            lock: Arc::new(lock),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Override how waits are slept.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Same collaborators, different bucket.
    pub fn for_key(&self, key: impl Into<String>) -> Self {
        Self { key: key.into(), ..self.clone() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Smooth rate limiter whose bucket lives in a shared [`PermitStore`].
///
/// Handles in different processes that share a key, store, and lock enforce one rate together.
/// Clones share the local rate setting.
#[derive(Clone)]
pub struct RateLimiter {
    ctx: LimiterContext,
    strategy: SmoothingStrategy,
    permits_per_second: DynamicConfig<f64>,
    initial_fill: InitialFill,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("key", &self.ctx.key)
            .field("strategy", &self.strategy)
            .field("permits_per_second", &*self.permits_per_second.get())
            .field("initial_fill", &self.initial_fill)
            .finish()
    }
}

impl RateLimiter {
    /// Bursty limiter banking up to `max_burst_seconds` of idle permits.
    pub fn bursty(
        ctx: LimiterContext,
        permits_per_second: f64,
        max_burst_seconds: f64,
    ) -> Result<Self, LimiterError> {
        Self::from_config(ctx, &LimiterConfig::bursty(permits_per_second, max_burst_seconds))
    }

    /// Warming-up limiter ramping from `cold_factor` times the stable interval over
    /// `warmup_period`.
    pub fn warming_up(
        ctx: LimiterContext,
        permits_per_second: f64,
        warmup_period: Duration,
        cold_factor: f64,
    ) -> Result<Self, LimiterError> {
        let cfg = LimiterConfig::warming_up(permits_per_second, warmup_period, cold_factor);
        Self::from_config(ctx, &cfg)
    }

    /// Build from a validated config.
    pub fn from_config(ctx: LimiterContext, cfg: &LimiterConfig) -> Result<Self, LimiterError> {
        if ctx.key.is_empty() {
            return Err(LimiterError::invalid("limiter key must not be empty"));
        }
        cfg.validate()?;
        Ok(Self {
            ctx,
            strategy: cfg.strategy(),
            permits_per_second: DynamicConfig::new(cfg.permits_per_second),
            initial_fill: cfg.initial_fill,
        })
    }

    /// Override how full a never-seen bucket starts.
    pub fn with_initial_fill(mut self, fill: InitialFill) -> Self {
        self.initial_fill = fill;
        self
    }

    pub fn key(&self) -> &str {
        &self.ctx.key
    }

    pub fn strategy(&self) -> SmoothingStrategy {
        self.strategy
    }

    /// Acquire `permits`, sleeping until they are granted. Returns the time slept.
    ///
    /// Dropping the returned future while it sleeps does not give the permits back; they were
    /// billed to the shared bucket when reserved.
    pub async fn acquire(&self, permits: u32) -> Result<Duration, LimiterError> {
        check_permits(permits)?;
        let wait = self.reserve(permits).await?;
        self.ctx.sleeper.sleep(wait).await;
        Ok(wait)
    }

    /// Acquire a single permit.
    pub async fn acquire_one(&self) -> Result<Duration, LimiterError> {
        self.acquire(1).await
    }

    /// Acquire `permits` only if they can be granted within `timeout`.
    ///
    /// Returns `false` without changing the bucket when the wait would exceed `timeout`. A zero
    /// timeout means "do not wait at all".
    pub async fn try_acquire(&self, permits: u32, timeout: Duration) -> Result<bool, LimiterError> {
        check_permits(permits)?;
        let timeout_micros = i64::try_from(timeout.as_micros()).unwrap_or(i64::MAX);

        let granted = self
            .with_lock(|| async move {
                let now = self.ctx.clock.now_micros();
                let mut state = self.load(now).await?;
                self.resync(&mut state, now);
                if state.next_free_ticket_micros.saturating_sub(now) > timeout_micros {
                    return Ok(None);
                }
                let earliest = self.reserve_earliest_available(&mut state, permits)?;
                self.persist(&state, now).await?;
                Ok(Some(wait_until(earliest, now)))
            })
            .await?;

        match granted {
            Some(wait) => {
                debug!(target: "smoothgate", key = %self.ctx.key, permits, wait_us = wait.as_micros() as u64, "try_acquire granted");
                self.ctx.sleeper.sleep(wait).await;
                Ok(true)
            }
            None => {
                debug!(target: "smoothgate", key = %self.ctx.key, permits, timeout_us = timeout_micros, "try_acquire declined");
                Ok(false)
            }
        }
    }

    /// Change the steady rate of the shared bucket.
    ///
    /// The bucket is first brought up to date at the old refill rate, then rescaled so its
    /// fraction full is unchanged.
    pub async fn set_rate(&self, permits_per_second: f64) -> Result<(), LimiterError> {
        validate_rate(permits_per_second)?;
        let stable_interval_micros = MICROS_PER_SECOND / permits_per_second;

        let (old_rate, stored) = self
            .with_lock(|| async move {
                let now = self.ctx.clock.now_micros();
                let mut state = self.load(now).await?;
                self.resync(&mut state, now);
                let old_rate = state.rate();
                self.strategy.do_set_rate(&mut state, permits_per_second, stable_interval_micros);
                self.persist(&state, now).await?;
                Ok((old_rate, state.stored_permits))
            })
            .await?;

        self.permits_per_second.set(permits_per_second);
        info!(target: "smoothgate", key = %self.ctx.key, old_rate, new_rate = permits_per_second, stored, "rate changed");
        Ok(())
    }

    /// Current steady rate of the shared bucket in permits per second.
    pub async fn rate(&self) -> Result<f64, LimiterError> {
        self.with_lock(|| async move {
            let now = self.ctx.clock.now_micros();
            let state = self.load(now).await?;
            self.persist(&state, now).await?;
            Ok(state.rate())
        })
        .await
    }

    /// Bucket state brought up to date with the clock. Nothing is written.
    pub async fn snapshot(&self) -> Result<PermitState, LimiterError> {
        self.with_lock(|| async move {
            let now = self.ctx.clock.now_micros();
            let mut state = self.load(now).await?;
            self.resync(&mut state, now);
            Ok(state)
        })
        .await
    }

    async fn reserve(&self, permits: u32) -> Result<Duration, LimiterError> {
        self.with_lock(|| async move {
            let now = self.ctx.clock.now_micros();
            let mut state = self.load(now).await?;
            self.resync(&mut state, now);
            let earliest = self.reserve_earliest_available(&mut state, permits)?;
            self.persist(&state, now).await?;
            let wait = wait_until(earliest, now);
            debug!(
                target: "smoothgate",
                key = %self.ctx.key,
                permits,
                wait_us = wait.as_micros() as u64,
                next_free_ticket = state.next_free_ticket_micros,
                stored = state.stored_permits,
                "reserved"
            );
            Ok(wait)
        })
        .await
    }

    /// Run `op` while holding the key's lock. The lock is released whatever `op` returns.
    async fn with_lock<T, F, Fut>(&self, op: F) -> Result<T, LimiterError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LimiterError>>,
    {
        let token = self.ctx.lock.acquire(&self.ctx.key).await?;
        let result = op().await;
        if let Err(e) = self.ctx.lock.release(token).await {
            // The write (if any) is committed; the backend's expiry reclaims the lock.
            warn!(target: "smoothgate", key = %self.ctx.key, error = %e, "failed to release permit lock");
        }
        result
    }

    async fn load(&self, now: i64) -> Result<PermitState, LimiterError> {
        match self.ctx.store.get(&self.ctx.key).await {
            Ok(Some(state)) => Ok(state),
            Ok(None) => {
                let state = self.fresh_state(now);
                info!(target: "smoothgate", key = %self.ctx.key, max_permits = state.max_permits, stored = state.stored_permits, "created bucket");
                Ok(state)
            }
            Err(StoreError::Serialization(e)) => {
                warn!(target: "smoothgate", key = %self.ctx.key, error = %e, "discarding undecodable bucket record");
                Ok(self.fresh_state(now))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, state: &PermitState, now: i64) -> Result<(), LimiterError> {
        self.ctx.store.set(&self.ctx.key, state, state.ttl(now)).await?;
        Ok(())
    }

    fn fresh_state(&self, now: i64) -> PermitState {
        self.strategy.initial_state(*self.permits_per_second.get(), self.initial_fill, now)
    }

    fn resync(&self, state: &mut PermitState, now: i64) {
        let cooldown = self.strategy.cooldown_interval_micros(state.stable_interval_micros);
        state.resync(now, cooldown);
    }

    /// Bill `permits` to the bucket and return the ticket this caller must wait for.
    fn reserve_earliest_available(
        &self,
        state: &mut PermitState,
        permits: u32,
    ) -> Result<i64, LimiterError> {
        let earliest = state.next_free_ticket_micros;
        let requested = f64::from(permits);
        let stored_to_spend = requested.min(state.stored_permits);
        let fresh_permits = requested - stored_to_spend;
        let wait_micros = self.strategy.wait_time_for(
            state.stored_permits,
            stored_to_spend,
            fresh_permits,
            state.stable_interval_micros,
        );
        state.next_free_ticket_micros = checked_ticket_add(earliest, wait_micros)?;
        state.stored_permits -= stored_to_spend;
        Ok(earliest)
    }
}

fn check_permits(permits: u32) -> Result<(), LimiterError> {
    if permits == 0 {
        return Err(LimiterError::invalid("requested permits must be positive"));
    }
    Ok(())
}

fn checked_ticket_add(ticket_micros: i64, wait_micros: f64) -> Result<i64, LimiterError> {
    let overflow = || LimiterError::ArithmeticOverflow { ticket_micros, wait_micros };
    // i64::MAX as f64 rounds up to 2^63, so `>=` rejects everything that cannot be cast back.
    if !wait_micros.is_finite() || wait_micros >= i64::MAX as f64 {
        return Err(overflow());
    }
    ticket_micros.checked_add(wait_micros.max(0.0) as i64).ok_or_else(overflow)
}

fn wait_until(earliest_micros: i64, now_micros: i64) -> Duration {
    let micros = earliest_micros.saturating_sub(now_micros).max(0);
    Duration::from_micros(micros as u64)
}

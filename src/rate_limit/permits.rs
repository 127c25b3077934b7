//! The persisted permit bucket.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum time a bucket record outlives its last touch.
pub const MIN_TTL: Duration = Duration::from_secs(120);

/// Shared state of one bucket, stored once per limiter key.
///
/// Invariants kept by every operation in this crate:
/// - `0 <= stored_permits <= max_permits`
/// - `stable_interval_micros > 0`
/// - `next_free_ticket_micros` never decreases for a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermitState {
    /// Current bucket capacity.
    pub max_permits: f64,
    /// Permits banked from idle time, spendable without waiting.
    pub stored_permits: f64,
    /// Microseconds between permits at the configured steady rate.
    pub stable_interval_micros: f64,
    /// Clock reading from which the next reservation is granted without queued wait.
    pub next_free_ticket_micros: i64,
}

impl PermitState {
    /// Credit permits earned since the ticket and move the ticket up to `now_micros`.
    ///
    /// `cooldown_interval_micros` is the refill interval of the active strategy. Returns `true`
    /// when the state changed.
    pub fn resync(&mut self, now_micros: i64, cooldown_interval_micros: f64) -> bool {
        if now_micros <= self.next_free_ticket_micros {
            return false;
        }
        let elapsed = (now_micros - self.next_free_ticket_micros) as f64;
        let new_permits = elapsed / cooldown_interval_micros;
        if new_permits.is_finite() {
            self.stored_permits = (self.stored_permits + new_permits).min(self.max_permits);
        }
        self.next_free_ticket_micros = now_micros;
        true
    }

    /// Steady rate in permits per second.
    pub fn rate(&self) -> f64 {
        1_000_000.0 / self.stable_interval_micros
    }

    /// Expiry to attach to a write made at `now_micros`.
    ///
    /// The record outlives any queued wait by [`MIN_TTL`], so an idle bucket eventually expires.
    pub fn ttl(&self, now_micros: i64) -> Duration {
        let ahead = self.next_free_ticket_micros.saturating_sub(now_micros).max(0);
        MIN_TTL + Duration::from_secs(ahead as u64 / 1_000_000)
    }

    /// Fraction of capacity currently banked (`0.0` for a zero-capacity bucket).
    pub fn fill_ratio(&self) -> f64 {
        if self.max_permits > 0.0 {
            self.stored_permits / self.max_permits
        } else {
            0.0
        }
    }
}

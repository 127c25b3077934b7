//! Clock abstractions used by the limiter and the in-memory store.
//!
//! Every participant touching the same bucket key must read a comparable time base, so the
//! default is [`SystemClock`] (wall-clock microseconds since the UNIX epoch).

use crate::sleeper::Sleeper;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current reading in microseconds.
    fn now_micros(&self) -> i64;
}

/// Wall clock backed by `SystemTime::now()`.
///
/// Readings are comparable across processes on hosts with synchronized clocks, which is what a
/// shared bucket needs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> i64 {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        i64::try_from(since_epoch.as_micros()).unwrap_or(i64::MAX)
    }
}

/// Monotonic clock backed by `Instant::now()`.
///
/// Notes: resets when the process restarts and is meaningless to other processes; only use it
/// when every handle to a bucket lives in this process.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now_micros(&self) -> i64 {
        i64::try_from(self.start.elapsed().as_micros()).unwrap_or(i64::MAX)
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same reading. It is also a [`Sleeper`]: sleeping advances the reading by
/// the requested duration and returns immediately.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicI64>,
}

impl ManualClock {
    /// Start the clock at `micros`.
    pub fn starting_at(micros: i64) -> Self {
        Self { micros: Arc::new(AtomicI64::new(micros)) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_micros()).unwrap_or(i64::MAX);
        self.advance_micros(delta);
    }

    /// Move the clock forward by a raw microsecond count (negative values are ignored).
    pub fn advance_micros(&self, delta: i64) {
        if delta > 0 {
            let _ = self.micros.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                Some(cur.saturating_add(delta))
            });
        }
    }

    /// Jump to an absolute reading.
    pub fn set_micros(&self, micros: i64) {
        self.micros.store(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> i64 {
        self.micros.load(Ordering::SeqCst)
    }
}

impl Sleeper for ManualClock {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        self.advance(duration);
        Box::pin(async {})
    }
}

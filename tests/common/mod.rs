#![allow(dead_code)]

use smoothgate::{InMemoryPermitStore, LimiterContext, LocalLock, ManualClock, Sleeper};
use std::time::Duration;

/// Arbitrary non-zero epoch for manual clocks.
pub const START: i64 = 1_700_000_000_000_000;

/// One shared store and lock, as several processes would see them.
pub struct Fixture {
    pub clock: ManualClock,
    pub store: InMemoryPermitStore,
    pub lock: LocalLock,
}

impl Fixture {
    pub fn new() -> Self {
        let clock = ManualClock::starting_at(START);
        let store = InMemoryPermitStore::new().with_clock(clock.clone());
        let lock = LocalLock::new().with_timeout(Duration::from_secs(5));
        Self { clock, store, lock }
    }

    /// Context whose sleeps advance the shared clock.
    pub fn ctx(&self, key: &str) -> LimiterContext {
        LimiterContext::new(key, self.store.clone(), self.lock.clone())
            .with_clock(self.clock.clone())
            .with_sleeper(self.clock.clone())
    }

    /// Context whose clock only moves when the test moves it.
    pub fn frozen_ctx<S: Sleeper + 'static>(&self, key: &str, sleeper: S) -> LimiterContext {
        LimiterContext::new(key, self.store.clone(), self.lock.clone())
            .with_clock(self.clock.clone())
            .with_sleeper(sleeper)
    }

    pub fn elapsed_micros(&self) -> i64 {
        use smoothgate::Clock;
        self.clock.now_micros() - START
    }
}

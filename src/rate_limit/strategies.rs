//! Smoothing strategies: how stored permits are priced and how capacity follows the rate.
//!
//! Both variants are stateless apart from their constants. Everything else is derived from the
//! persisted [`PermitState`], so handles in different processes agree even after one of them
//! changes the rate.

use crate::config::InitialFill;
use crate::rate_limit::permits::PermitState;
use std::time::Duration;

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// The two supported bucket shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SmoothingStrategy {
    /// Plain token bucket: banked permits are free, capacity is `max_burst_seconds` of rate.
    Bursty {
        /// Seconds of idle time the bucket may bank.
        max_burst_seconds: f64,
    },
    /// Cold buckets charge more per permit, ramping linearly down to the stable interval as the
    /// bank drains below the threshold.
    WarmingUp {
        /// Time it takes a full (cold) bucket to ramp down to the stable rate.
        warmup_period_micros: f64,
        /// Cold interval as a multiple of the stable interval.
        cold_factor: f64,
    },
}

impl SmoothingStrategy {
    /// Bursty strategy banking up to `max_burst_seconds` of permits.
    pub fn bursty(max_burst_seconds: f64) -> Self {
        Self::Bursty { max_burst_seconds }
    }

    /// Warming-up strategy over `warmup_period` with the given cold factor.
    pub fn warming_up(warmup_period: Duration, cold_factor: f64) -> Self {
        Self::WarmingUp { warmup_period_micros: warmup_period.as_micros() as f64, cold_factor }
    }

    /// Capacity for a bucket running at `stable_interval_micros`.
    pub fn max_permits(&self, stable_interval_micros: f64) -> f64 {
        match *self {
            Self::Bursty { max_burst_seconds } => {
                max_burst_seconds * (MICROS_PER_SECOND / stable_interval_micros)
            }
            Self::WarmingUp { warmup_period_micros, cold_factor } => {
                let cold_interval = stable_interval_micros * cold_factor;
                Self::threshold(warmup_period_micros, stable_interval_micros)
                    + 2.0 * warmup_period_micros / (stable_interval_micros + cold_interval)
            }
        }
    }

    /// Bank level above which a warming-up bucket charges more than the stable interval.
    /// Bursty buckets have no threshold.
    pub fn threshold_permits(&self, stable_interval_micros: f64) -> Option<f64> {
        match *self {
            Self::Bursty { .. } => None,
            Self::WarmingUp { warmup_period_micros, .. } => {
                Some(Self::threshold(warmup_period_micros, stable_interval_micros))
            }
        }
    }

    /// Interval at which idle time refills the bank.
    pub fn cooldown_interval_micros(&self, stable_interval_micros: f64) -> f64 {
        match *self {
            Self::Bursty { .. } => stable_interval_micros,
            // A cold bucket refills completely over one warm-up period.
            Self::WarmingUp { warmup_period_micros, .. } => {
                warmup_period_micros / self.max_permits(stable_interval_micros)
            }
        }
    }

    /// Microseconds a reservation costs.
    ///
    /// `stored_to_spend` permits come out of the bank (of `stored_permits` banked); the
    /// `fresh_permits` beyond it always cost one stable interval each.
    pub fn wait_time_for(
        &self,
        stored_permits: f64,
        stored_to_spend: f64,
        fresh_permits: f64,
        stable_interval_micros: f64,
    ) -> f64 {
        let fresh = fresh_permits * stable_interval_micros;
        match *self {
            Self::Bursty { .. } => fresh,
            Self::WarmingUp { warmup_period_micros, cold_factor } => {
                let threshold = Self::threshold(warmup_period_micros, stable_interval_micros);
                let slope = self.slope(stable_interval_micros, cold_factor, threshold);
                let permits_to_time = |permits: f64| stable_interval_micros + permits * slope;

                let mut to_take = stored_to_spend;
                let mut micros = 0.0;
                let above_threshold = stored_permits - threshold;
                if above_threshold > 0.0 {
                    let take = above_threshold.min(to_take);
                    // trapezoid under the ramp between the two bank levels
                    let length =
                        permits_to_time(above_threshold) + permits_to_time(above_threshold - take);
                    micros = take * length / 2.0;
                    to_take -= take;
                }
                micros + stable_interval_micros * to_take + fresh
            }
        }
    }

    /// Apply a new rate to `state`, rescaling the bank so its fraction full is preserved.
    pub fn do_set_rate(
        &self,
        state: &mut PermitState,
        permits_per_second: f64,
        stable_interval_micros: f64,
    ) {
        debug_assert!(
            (MICROS_PER_SECOND / permits_per_second - stable_interval_micros).abs()
                <= stable_interval_micros * 1e-9
        );
        let old_max = state.max_permits;
        let new_max = self.max_permits(stable_interval_micros);
        state.stable_interval_micros = stable_interval_micros;
        state.max_permits = new_max;
        state.stored_permits = if old_max.is_infinite() {
            match self {
                Self::Bursty { .. } => new_max,
                Self::WarmingUp { .. } => 0.0,
            }
        } else if old_max == 0.0 {
            0.0
        } else {
            (state.stored_permits * new_max / old_max).clamp(0.0, new_max)
        };
    }

    /// State for a key seen for the first time.
    pub fn initial_state(
        &self,
        permits_per_second: f64,
        fill: InitialFill,
        now_micros: i64,
    ) -> PermitState {
        let stable_interval_micros = MICROS_PER_SECOND / permits_per_second;
        let max_permits = self.max_permits(stable_interval_micros);
        let stored_permits = match fill {
            InitialFill::Full => max_permits,
            InitialFill::Empty => 0.0,
        };
        PermitState {
            max_permits,
            stored_permits,
            stable_interval_micros,
            next_free_ticket_micros: now_micros,
        }
    }

    fn threshold(warmup_period_micros: f64, stable_interval_micros: f64) -> f64 {
        0.5 * warmup_period_micros / stable_interval_micros
    }

    fn slope(&self, stable_interval_micros: f64, cold_factor: f64, threshold: f64) -> f64 {
        let cold_interval = stable_interval_micros * cold_factor;
        let ramp = self.max_permits(stable_interval_micros) - threshold;
        if ramp > 0.0 {
            (cold_interval - stable_interval_micros) / ramp
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STABLE_5_PER_SEC: f64 = 200_000.0;

    fn warming() -> SmoothingStrategy {
        SmoothingStrategy::warming_up(Duration::from_secs(2), 3.0)
    }

    #[test]
    fn bursty_capacity_and_cooldown() {
        let s = SmoothingStrategy::bursty(10.0);
        assert!((s.max_permits(1_000_000.0) - 10.0).abs() < 1e-9);
        assert_eq!(s.cooldown_interval_micros(1_000_000.0), 1_000_000.0);
        assert_eq!(s.threshold_permits(1_000_000.0), None);
    }

    #[test]
    fn bursty_charges_only_fresh_permits() {
        let s = SmoothingStrategy::bursty(1.0);
        assert_eq!(s.wait_time_for(5.0, 3.0, 0.0, 100_000.0), 0.0);
        assert_eq!(s.wait_time_for(2.0, 2.0, 3.0, 100_000.0), 300_000.0);
    }

    #[test]
    fn warming_up_derived_constants() {
        let s = warming();
        assert_eq!(s.threshold_permits(STABLE_5_PER_SEC), Some(5.0));
        assert_eq!(s.max_permits(STABLE_5_PER_SEC), 10.0);
        assert_eq!(s.cooldown_interval_micros(STABLE_5_PER_SEC), 200_000.0);
    }

    #[test]
    fn warming_up_cooldown_differs_from_stable_interval() {
        let s = SmoothingStrategy::warming_up(Duration::from_millis(1200), 5.0);
        assert_eq!(s.threshold_permits(STABLE_5_PER_SEC), Some(3.0));
        assert_eq!(s.max_permits(STABLE_5_PER_SEC), 5.0);
        assert_eq!(s.cooldown_interval_micros(STABLE_5_PER_SEC), 240_000.0);
        // slope = (1_000k - 200k) / (5 - 3) = 400k per permit above threshold
        assert_eq!(s.wait_time_for(5.0, 1.0, 0.0, STABLE_5_PER_SEC), 800_000.0);
    }

    #[test]
    fn warming_up_set_rate_rescales_finite_capacity() {
        let s = SmoothingStrategy::warming_up(Duration::from_millis(1200), 5.0);
        let mut state = s.initial_state(5.0, InitialFill::Full, 0);
        state.stored_permits = 2.5;
        s.do_set_rate(&mut state, 10.0, 100_000.0);
        assert!((state.max_permits - 10.0).abs() < 1e-9);
        assert!((state.stored_permits - 5.0).abs() < 1e-9);
        assert_eq!(s.cooldown_interval_micros(state.stable_interval_micros), 120_000.0);
    }

    #[test]
    fn warming_up_cold_permits_cost_more_and_decay() {
        let s = warming();
        // slope = (600k - 200k) / (10 - 5) = 80k per permit above threshold
        let first = s.wait_time_for(10.0, 1.0, 0.0, STABLE_5_PER_SEC);
        assert_eq!(first, 560_000.0);
        let second = s.wait_time_for(9.0, 1.0, 0.0, STABLE_5_PER_SEC);
        assert_eq!(second, 480_000.0);
        let at_threshold = s.wait_time_for(5.0, 1.0, 0.0, STABLE_5_PER_SEC);
        assert_eq!(at_threshold, STABLE_5_PER_SEC);
    }

    #[test]
    fn warming_up_straddling_threshold_mixes_ramp_and_stable() {
        let s = warming();
        // 2 permits on the ramp (360k down to 200k), 1 stored below threshold, 1 fresh
        let micros = s.wait_time_for(7.0, 3.0, 1.0, STABLE_5_PER_SEC);
        assert_eq!(micros, 560_000.0 + 200_000.0 + 200_000.0);
    }

    #[test]
    fn set_rate_preserves_fraction_full() {
        let s = SmoothingStrategy::bursty(1.0);
        let mut state = s.initial_state(10.0, InitialFill::Full, 0);
        state.stored_permits = 4.0;
        s.do_set_rate(&mut state, 20.0, 50_000.0);
        assert!((state.max_permits - 20.0).abs() < 1e-9);
        assert!((state.stored_permits - 8.0).abs() < 1e-9);
        assert_eq!(state.stable_interval_micros, 50_000.0);
    }

    #[test]
    fn set_rate_from_zero_capacity_empties_bank() {
        let s = SmoothingStrategy::bursty(0.0);
        let mut state = s.initial_state(10.0, InitialFill::Full, 0);
        assert_eq!(state.max_permits, 0.0);
        let grown = SmoothingStrategy::bursty(1.0);
        grown.do_set_rate(&mut state, 10.0, 100_000.0);
        assert_eq!(state.stored_permits, 0.0);
    }

    #[test]
    fn set_rate_from_unbounded_capacity() {
        let mut state = PermitState {
            max_permits: f64::INFINITY,
            stored_permits: 3.0,
            stable_interval_micros: 100_000.0,
            next_free_ticket_micros: 0,
        };
        let mut warm_state = state.clone();
        SmoothingStrategy::bursty(1.0).do_set_rate(&mut state, 10.0, 100_000.0);
        assert!((state.stored_permits - state.max_permits).abs() < 1e-9);
        warming().do_set_rate(&mut warm_state, 5.0, STABLE_5_PER_SEC);
        assert_eq!(warm_state.stored_permits, 0.0);
    }

    #[test]
    fn initial_fill_policies() {
        let s = warming();
        let full = s.initial_state(5.0, InitialFill::Full, 77);
        assert_eq!(full.stored_permits, 10.0);
        assert_eq!(full.next_free_ticket_micros, 77);
        let empty = s.initial_state(5.0, InitialFill::Empty, 77);
        assert_eq!(empty.stored_permits, 0.0);
    }
}

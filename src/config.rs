//! Validated limiter configuration.
//!
//! Configs deserialize from JSON so deployments can ship limiter settings alongside the rest of
//! their service config:
//!
//! ```rust
//! use smoothgate::config::{LimiterConfig, SmoothingConfig};
//!
//! let cfg = LimiterConfig::from_json(
//!     r#"{ "permits_per_second": 5.0,
//!          "smoothing": { "kind": "warming_up", "warmup_period_ms": 2000 } }"#,
//! )
//! .unwrap();
//! assert_eq!(cfg.smoothing, SmoothingConfig::WarmingUp { warmup_period_ms: 2000, cold_factor: 3.0 });
//! ```

use crate::error::LimiterError;
use crate::rate_limit::strategies::SmoothingStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default burst window for bursty buckets.
pub const DEFAULT_MAX_BURST_SECONDS: f64 = 1.0;
/// Default cold factor for warming-up buckets.
pub const DEFAULT_COLD_FACTOR: f64 = 3.0;

/// How full a bucket is when its key is first seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialFill {
    /// Start with the full capacity banked. For warming-up buckets this means "cold".
    #[default]
    Full,
    /// Start with nothing banked.
    Empty,
}

/// Shape of the bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SmoothingConfig {
    /// Plain token bucket.
    Bursty {
        /// Seconds of idle time the bucket may bank.
        #[serde(default = "default_max_burst_seconds")]
        max_burst_seconds: f64,
    },
    /// Cold-start ramp.
    WarmingUp {
        /// Ramp length in milliseconds.
        warmup_period_ms: u64,
        /// Cold interval as a multiple of the stable interval.
        #[serde(default = "default_cold_factor")]
        cold_factor: f64,
    },
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self::Bursty { max_burst_seconds: DEFAULT_MAX_BURST_SECONDS }
    }
}

fn default_max_burst_seconds() -> f64 {
    DEFAULT_MAX_BURST_SECONDS
}

fn default_cold_factor() -> f64 {
    DEFAULT_COLD_FACTOR
}

/// Settings for one limiter handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Steady rate.
    pub permits_per_second: f64,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    #[serde(default)]
    pub initial_fill: InitialFill,
}

impl LimiterConfig {
    /// Bursty bucket banking up to `max_burst_seconds` of permits.
    pub fn bursty(permits_per_second: f64, max_burst_seconds: f64) -> Self {
        Self {
            permits_per_second,
            smoothing: SmoothingConfig::Bursty { max_burst_seconds },
            initial_fill: InitialFill::Full,
        }
    }

    /// Warming-up bucket ramping over `warmup_period`.
    pub fn warming_up(permits_per_second: f64, warmup_period: Duration, cold_factor: f64) -> Self {
        let warmup_period_ms = u64::try_from(warmup_period.as_millis()).unwrap_or(u64::MAX);
        Self {
            permits_per_second,
            smoothing: SmoothingConfig::WarmingUp { warmup_period_ms, cold_factor },
            initial_fill: InitialFill::Full,
        }
    }

    /// Override the first-use fill policy.
    pub fn with_initial_fill(mut self, fill: InitialFill) -> Self {
        self.initial_fill = fill;
        self
    }

    /// Parse and validate a JSON config.
    pub fn from_json(raw: &str) -> Result<Self, LimiterError> {
        let cfg: Self = serde_json::from_str(raw)
            .map_err(|e| LimiterError::invalid(format!("malformed limiter config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check every value is usable.
    pub fn validate(&self) -> Result<(), LimiterError> {
        validate_rate(self.permits_per_second)?;
        match self.smoothing {
            SmoothingConfig::Bursty { max_burst_seconds } => {
                if !max_burst_seconds.is_finite() || max_burst_seconds < 0.0 {
                    return Err(LimiterError::invalid(format!(
                        "max_burst_seconds must be finite and >= 0 (got {max_burst_seconds})"
                    )));
                }
            }
            SmoothingConfig::WarmingUp { warmup_period_ms, cold_factor } => {
                if warmup_period_ms == 0 {
                    return Err(LimiterError::invalid("warmup_period must be > 0"));
                }
                if !cold_factor.is_finite() || cold_factor < 1.0 {
                    return Err(LimiterError::invalid(format!(
                        "cold_factor must be finite and >= 1 (got {cold_factor})"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Strategy described by this config.
    pub fn strategy(&self) -> SmoothingStrategy {
        match self.smoothing {
            SmoothingConfig::Bursty { max_burst_seconds } => {
                SmoothingStrategy::bursty(max_burst_seconds)
            }
            SmoothingConfig::WarmingUp { warmup_period_ms, cold_factor } => {
                SmoothingStrategy::warming_up(Duration::from_millis(warmup_period_ms), cold_factor)
            }
        }
    }
}

/// Rates must be positive and finite.
pub fn validate_rate(permits_per_second: f64) -> Result<(), LimiterError> {
    if permits_per_second.is_finite() && permits_per_second > 0.0 {
        Ok(())
    } else {
        Err(LimiterError::invalid(format!(
            "permits_per_second must be positive and finite (got {permits_per_second})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bursty_defaults_from_json() {
        let cfg = LimiterConfig::from_json(r#"{ "permits_per_second": 10 }"#).unwrap();
        assert_eq!(cfg, LimiterConfig::bursty(10.0, 1.0));
        assert_eq!(cfg.initial_fill, InitialFill::Full);
    }

    #[test]
    fn warming_up_from_json_with_empty_fill() {
        let cfg = LimiterConfig::from_json(
            r#"{ "permits_per_second": 5,
                 "smoothing": { "kind": "warming_up", "warmup_period_ms": 2000, "cold_factor": 4 },
                 "initial_fill": "empty" }"#,
        )
        .unwrap();
        assert_eq!(cfg.initial_fill, InitialFill::Empty);
        assert_eq!(
            cfg.strategy(),
            SmoothingStrategy::WarmingUp { warmup_period_micros: 2_000_000.0, cold_factor: 4.0 }
        );
    }

    #[test]
    fn rejects_bad_rates() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = LimiterConfig::bursty(rate, 1.0).validate().unwrap_err();
            assert!(err.is_invalid_argument(), "rate {rate} should be rejected");
        }
    }

    #[test]
    fn rejects_bad_smoothing_parameters() {
        assert!(LimiterConfig::bursty(1.0, -0.5).validate().is_err());
        assert!(LimiterConfig::bursty(1.0, f64::NAN).validate().is_err());
        assert!(LimiterConfig::bursty(1.0, 0.0).validate().is_ok());
        assert!(LimiterConfig::warming_up(1.0, Duration::ZERO, 3.0).validate().is_err());
        assert!(LimiterConfig::warming_up(1.0, Duration::from_secs(1), 0.5).validate().is_err());
        assert!(LimiterConfig::warming_up(1.0, Duration::from_secs(1), 1.0).validate().is_ok());
    }

    #[test]
    fn malformed_json_is_invalid_argument() {
        let err = LimiterConfig::from_json("{ nope").unwrap_err();
        assert!(err.is_invalid_argument());
    }
}

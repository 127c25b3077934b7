//! Convenient re-exports for common Smoothgate types.
pub use crate::{
    clock::{Clock, ManualClock, SystemClock},
    config::{InitialFill, LimiterConfig, SmoothingConfig},
    rate_limit::{
        InMemoryPermitStore, LimiterContext, LocalLock, PermitLock, PermitState, PermitStore,
        RateLimitError, RateLimitLayer, RateLimiter, SmoothingStrategy,
    },
    sleeper::{Sleeper, TokioSleeper},
    LimiterError,
};

#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Smoothgate
//!
//! Smooth token-bucket rate limiting shared by many processes: the bucket lives in an external
//! store and every update happens under a cluster-wide lock.
//!
//! ## Features
//!
//! - **Bursty buckets** that bank idle time up to a burst window
//! - **Warming-up buckets** that charge more while cold and ramp down to the stable rate
//! - **Two-phase billing**: a caller pays for capacity reserved before it, and its own cost is
//!   pushed onto the next caller
//! - **Pluggable backends** via the `PermitStore` and `PermitLock` seams (in-memory bundled,
//!   etcd in `smoothgate-etcd`)
//! - **Tower middleware** that paces requests through a limiter
//!
//! ## Quick Start
//!
//! ```rust
//! use smoothgate::{InMemoryPermitStore, LimiterContext, LocalLock, RateLimiter};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let ctx = LimiterContext::new("checkout", InMemoryPermitStore::new(), LocalLock::new());
//!     let limiter = RateLimiter::warming_up(ctx, 50.0, Duration::from_secs(1), 3.0).unwrap();
//!
//!     let waited = limiter.acquire(1).await.unwrap();
//!     let granted = limiter.try_acquire(1, Duration::from_millis(100)).await.unwrap();
//!     println!("waited {:?}, second permit granted: {}", waited, granted);
//! }
//! ```

pub mod adaptive;
pub mod clock;
pub mod config;
pub mod error;
pub mod prelude;
pub mod rate_limit;
pub mod sleeper;

// Re-exports
pub use adaptive::DynamicConfig;
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use config::{InitialFill, LimiterConfig, SmoothingConfig};
pub use error::LimiterError;
pub use rate_limit::{
    InMemoryPermitStore, LimiterContext, LocalLock, LockError, LockToken, PermitLock, PermitState,
    PermitStore, RateLimitLayer, RateLimiter, SmoothingStrategy, StoreError,
};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};

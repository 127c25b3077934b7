//! Distributed smooth rate limiting.
//!
//! This module provides the building blocks:
//! - [`RateLimiter`]: acquire / try-acquire / set-rate against a shared bucket.
//! - [`PermitState`]: the persisted bucket entity.
//! - [`SmoothingStrategy`]: bursty vs. warming-up pricing of banked permits.
//! - [`PermitStore`] / [`PermitLock`]: the storage and mutual-exclusion seams.
//! - [`RateLimitLayer`]: Tower middleware that paces requests through a limiter.
//!
//! # Architecture
//!
//! The bucket is not owned by any process:
//! - **Storage**: `PermitStore` (in `store` module) holds one `PermitState` per key, with a TTL
//!   refreshed on every write so idle buckets expire.
//! - **Exclusion**: `PermitLock` (in `lock` module) serializes every read-modify-write of a key
//!   across the cluster.
//! - **Logic**: `SmoothingStrategy` (in `strategies` module) handles the math; `RateLimiter`
//!   composes the pieces and sleeps outside the lock.

pub mod limiter;
pub mod lock;
pub mod middleware;
pub mod permits;
pub mod store;
pub mod strategies;

pub use limiter::{LimiterContext, RateLimiter};
pub use lock::{LocalLock, LockError, LockToken, PermitLock};
pub use middleware::{CostFn, PermitCost, RateLimitError, RateLimitLayer, RateLimitService, UnitCost};
pub use permits::{PermitState, MIN_TTL};
pub use store::{InMemoryPermitStore, PermitStore, StoreError};
pub use strategies::SmoothingStrategy;

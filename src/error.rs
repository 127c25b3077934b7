//! Error types for the rate limiter
use crate::rate_limit::lock::LockError;
use crate::rate_limit::store::StoreError;

/// Unified error type for all limiter operations.
#[derive(thiserror::Error, Debug)]
pub enum LimiterError {
    /// A caller-supplied value was rejected (non-positive permits, bad rate, bad config).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Advancing the next free ticket would leave the representable range.
    #[error("next free ticket overflow: {ticket_micros}us + {wait_micros}us")]
    ArithmeticOverflow {
        /// Ticket value before the failed addition.
        ticket_micros: i64,
        /// Wait that could not be added.
        wait_micros: f64,
    },
    /// The cluster-wide lock for `key` could not be obtained.
    #[error("lock unavailable for {key}: {reason}")]
    LockUnavailable {
        /// Limiter key whose lock was requested.
        key: String,
        /// Backend-specific reason.
        reason: String,
    },
    /// The permit store could not be reached or timed out.
    #[error("permit store unavailable: {0}")]
    StoreUnavailable(String),
    /// A permit record could not be encoded or decoded.
    #[error("permit record serialization failed: {0}")]
    Serialization(String),
}

impl LimiterError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Check if the caller passed a bad argument.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Check if the ticket arithmetic overflowed.
    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::ArithmeticOverflow { .. })
    }

    /// Check if the lock could not be obtained.
    pub fn is_lock_unavailable(&self) -> bool {
        matches!(self, Self::LockUnavailable { .. })
    }

    /// Check if the store could not be reached.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Infrastructure failures a caller may retry with its own backoff.
    pub fn is_transient(&self) -> bool {
        self.is_lock_unavailable() || self.is_store_unavailable()
    }
}

impl From<StoreError> for LimiterError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
            StoreError::Serialization(e) => Self::Serialization(e.to_string()),
        }
    }
}

impl From<LockError> for LimiterError {
    fn from(err: LockError) -> Self {
        let key = err.key().to_string();
        Self::LockUnavailable { key, reason: err.to_string() }
    }
}

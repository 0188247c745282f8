//! Error types for the throttle gate.

/// Errors returned to a caller that asked the gate for admission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThrottleError {
    /// The gate is at capacity and the call was not started.
    ///
    /// Returned under [`RejectionPolicy::Abort`](crate::RejectionPolicy::Abort),
    /// under `Block` when the wait queue is full, and under `DiscardOldest`
    /// when there is nothing left to evict.
    #[error("throttle rejected call: max concurrent ({max_concurrent}) reached with {queued} waiting")]
    Rejected {
        /// Configured admission limit.
        max_concurrent: usize,
        /// Number of callers already waiting when the call was rejected.
        queued: usize,
    },
    /// The call was evicted to make room for a newer one.
    #[error("throttle discarded call to make room for a newer one")]
    Discarded,
    /// The caller's own cancellation fired before admission.
    #[error("cancelled while waiting for throttle admission")]
    Cancelled,
}

impl ThrottleError {
    /// Returns `true` if this is a rejection.
    pub fn is_rejected(&self) -> bool {
        matches!(self, ThrottleError::Rejected { .. })
    }

    /// Returns `true` if the call was evicted.
    pub fn is_discarded(&self) -> bool {
        matches!(self, ThrottleError::Discarded)
    }

    /// Returns `true` if the caller cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ThrottleError::Cancelled)
    }
}

/// Invalid gate configuration, reported by
/// [`ThrottleConfigBuilder::build`](crate::ThrottleConfigBuilder::build).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `max_concurrent` must admit at least one call.
    #[error("max_concurrent must be greater than zero")]
    ZeroMaxConcurrent,
    /// `window_duration` must be a positive duration.
    #[error("window_duration must be greater than zero")]
    ZeroWindow,
}

/// Result type for gate operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("invalid time window: {0}")]
    InvalidTimeWindow(String),
    #[error("event is at capacity")]
    CapacityExceeded,
    #[error("cannot RSVP to an ended event")]
    EventEnded,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("permission check failed: {0}")]
    PermissionCheckFailed(String),
    #[error("rsvp saved but counters could not be refreshed: {0}")]
    CountersStale(String),
    #[error("cascade failed for {failed} of {attempted} instances")]
    CascadeFailure { attempted: usize, failed: usize },
    #[error("event was modified concurrently")]
    ConcurrencyConflict,
    #[error("notification delivery failed: {0}")]
    Notification(String),
    #[error("store error: {0}")]
    Store(StoreError),
}

impl CoreError {
    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::PermissionCheckFailed(_)
            | CoreError::CountersStale(_)
            | CoreError::CascadeFailure { .. }
            | CoreError::ConcurrencyConflict
            | CoreError::Notification(_) => true,
            CoreError::Store(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Machine-readable error code string.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::NotFound => "NOT_FOUND",
            CoreError::Forbidden => "FORBIDDEN",
            CoreError::InvalidTimeWindow(_) => "INVALID_TIME_WINDOW",
            CoreError::CapacityExceeded => "CAPACITY_EXCEEDED",
            CoreError::EventEnded => "EVENT_ENDED",
            CoreError::BadRequest(_) => "BAD_REQUEST",
            CoreError::Conflict(_) => "CONFLICT",
            CoreError::PermissionCheckFailed(_) => "PERMISSION_CHECK_FAILED",
            CoreError::CountersStale(_) => "COUNTERS_STALE",
            CoreError::CascadeFailure { .. } => "CASCADE_FAILURE",
            CoreError::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            CoreError::Notification(_) => "NOTIFICATION_FAILED",
            CoreError::Store(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP-equivalent status for transport layers.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::NotFound => 404,
            CoreError::Forbidden => 403,
            CoreError::InvalidTimeWindow(_)
            | CoreError::CapacityExceeded
            | CoreError::EventEnded
            | CoreError::BadRequest(_) => 400,
            CoreError::Conflict(_) | CoreError::ConcurrencyConflict => 409,
            CoreError::CountersStale(_) => 503,
            CoreError::Notification(_) => 502,
            CoreError::PermissionCheckFailed(_)
            | CoreError::CascadeFailure { .. }
            | CoreError::Store(_) => 500,
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => CoreError::NotFound,
            StoreError::VersionMismatch { .. } => CoreError::ConcurrencyConflict,
            other => CoreError::Store(other),
        }
    }
}

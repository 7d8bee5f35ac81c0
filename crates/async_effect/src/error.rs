//! Error types for cancellable routines

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Why a task was canceled.
///
/// `Unmounted`, `Restarted` and `Overflow` are the reserved reasons raised by the
/// runners themselves. Their [`code`](CancelReason::code)s are stable.
#[derive(Debug, Clone, Default)]
pub enum CancelReason {
    /// The owning scope was torn down.
    Unmounted,
    /// A newer call superseded this one.
    Restarted,
    /// The admission queue was full.
    Overflow,
    /// The per-task timeout elapsed.
    Timeout,
    /// Explicit cancellation without a reason.
    #[default]
    Canceled,
    /// The task's driver was dropped before it could settle.
    Aborted,
    /// Caller-supplied message.
    Message(String),
    /// Caller-supplied error value.
    Error(Arc<dyn std::error::Error + Send + Sync>),
}

impl CancelReason {
    pub const UNMOUNTED: &'static str = "unmounted";
    pub const RESTARTED: &'static str = "restarted";
    pub const OVERFLOW: &'static str = "overflow";
    pub const TIMEOUT: &'static str = "timeout";

    /// Wrap an arbitrary error as a cancellation reason
    pub fn error<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        CancelReason::Error(Arc::new(error))
    }

    /// Stable, externally observable reason code
    pub fn code(&self) -> String {
        match self {
            CancelReason::Unmounted => Self::UNMOUNTED.to_string(),
            CancelReason::Restarted => Self::RESTARTED.to_string(),
            CancelReason::Overflow => Self::OVERFLOW.to_string(),
            CancelReason::Timeout => Self::TIMEOUT.to_string(),
            CancelReason::Canceled => "canceled".to_string(),
            CancelReason::Aborted => "aborted".to_string(),
            CancelReason::Message(message) => message.clone(),
            CancelReason::Error(err) => err.to_string(),
        }
    }

    /// Teardown artifacts are bookkeeping, not user-observable outcomes.
    pub fn is_teardown(&self) -> bool {
        matches!(self, CancelReason::Unmounted | CancelReason::Restarted)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

impl PartialEq for CancelReason {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CancelReason::Error(a), CancelReason::Error(b)) => {
                Arc::ptr_eq(a, b) || a.to_string() == b.to_string()
            }
            (CancelReason::Message(a), CancelReason::Message(b)) => a == b,
            (CancelReason::Error(_), _) | (_, CancelReason::Error(_)) => false,
            (CancelReason::Message(_), _) | (_, CancelReason::Message(_)) => false,
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl Eq for CancelReason {}

impl From<&str> for CancelReason {
    fn from(value: &str) -> Self {
        CancelReason::Message(value.to_string())
    }
}

impl From<String> for CancelReason {
    fn from(value: String) -> Self {
        CancelReason::Message(value)
    }
}

/// A task ended because it was canceled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("task canceled: {reason}")]
pub struct CanceledError {
    reason: CancelReason,
}

impl CanceledError {
    pub fn new(reason: CancelReason) -> Self {
        Self { reason }
    }

    pub fn reason(&self) -> &CancelReason {
        &self.reason
    }

    pub fn code(&self) -> String {
        self.reason.code()
    }
}

impl From<CancelReason> for CanceledError {
    fn from(reason: CancelReason) -> Self {
        CanceledError::new(reason)
    }
}

/// How a task handle can fail
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError<E> {
    /// The routine returned an error.
    #[error("routine failed: {0:?}")]
    Failed(E),

    #[error(transparent)]
    Canceled(#[from] CanceledError),
}

impl<E> TaskError<E> {
    pub(crate) fn canceled(reason: CancelReason) -> Self {
        TaskError::Canceled(CanceledError::new(reason))
    }

    /// Check if this error indicates cancellation
    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled(_))
    }

    /// Check if the call was rejected because the queue was full
    pub fn is_overflow(&self) -> bool {
        matches!(self.reason(), Some(CancelReason::Overflow))
    }

    /// Check if the task ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self.reason(), Some(CancelReason::Timeout))
    }

    /// The cancellation reason, if this is a cancellation
    pub fn reason(&self) -> Option<&CancelReason> {
        match self {
            TaskError::Canceled(err) => Some(err.reason()),
            TaskError::Failed(_) => None,
        }
    }

    /// The routine's own error, if it failed
    pub fn failure(&self) -> Option<&E> {
        match self {
            TaskError::Failed(err) => Some(err),
            TaskError::Canceled(_) => None,
        }
    }
}

/// Errors raised while validating a runner's configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid concurrency limit: {value} (must be >= 0)")]
    InvalidConcurrency { value: i64 },

    #[error("invalid queue capacity: {value} (must be -1 or >= 0)")]
    InvalidQueueCapacity { value: i64 },

    #[error("cancel_previous cannot be combined with a concurrency limit of {limit}")]
    CancelPreviousWithConcurrency { limit: usize },

    #[error("status tracking requires exactly one running slot, got {limit:?}")]
    StatusTrackingRequiresSingleSlot { limit: Option<usize> },

    #[error("invalid timeout duration: {duration:?} (must be > 0)")]
    InvalidTimeout { duration: Duration },
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    pub fn invalid_concurrency(value: i64) -> Self {
        ConfigError::InvalidConcurrency { value }
    }

    pub fn invalid_queue_capacity(value: i64) -> Self {
        ConfigError::InvalidQueueCapacity { value }
    }

    pub fn invalid_timeout(duration: Duration) -> Self {
        ConfigError::InvalidTimeout { duration }
    }
}

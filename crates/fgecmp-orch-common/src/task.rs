//! Per-entry processing outcome types.

use thiserror::Error;

/// Outcome of processing a single table delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Entry applied.
    Success,
    /// Entry malformed; logged and dropped.
    InvalidEntry,
    /// Entry failed permanently.
    Failed,
    /// Dependencies not met; keep the entry queued.
    NeedRetry,
    /// Entry deliberately not acted on (duplicate, no-op).
    Ignore,
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Ignore)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStatus::NeedRetry)
    }
}

/// Error type for entry processing.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("Invalid entry: {message}")]
    InvalidEntry { message: String },

    #[error("Southbound error: {message}")]
    SaiError { message: String },

    #[error("Retry needed: {reason}")]
    NeedRetry { reason: String },

    #[error("Ignored: {reason}")]
    Ignored { reason: String },
}

impl TaskError {
    pub fn invalid_entry(message: impl Into<String>) -> Self {
        TaskError::InvalidEntry {
            message: message.into(),
        }
    }

    pub fn sai_error(message: impl Into<String>) -> Self {
        TaskError::SaiError {
            message: message.into(),
        }
    }

    pub fn need_retry(reason: impl Into<String>) -> Self {
        TaskError::NeedRetry {
            reason: reason.into(),
        }
    }

    pub fn ignored(reason: impl Into<String>) -> Self {
        TaskError::Ignored {
            reason: reason.into(),
        }
    }

    pub fn to_status(&self) -> TaskStatus {
        match self {
            TaskError::InvalidEntry { .. } => TaskStatus::InvalidEntry,
            TaskError::SaiError { .. } => TaskStatus::Failed,
            TaskError::NeedRetry { .. } => TaskStatus::NeedRetry,
            TaskError::Ignored { .. } => TaskStatus::Ignore,
        }
    }
}

/// Result type for entry processing.
pub type TaskResult<T> = Result<T, TaskError>;

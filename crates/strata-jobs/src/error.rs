//! Scheduler error types.

use thiserror::Error;

/// Result type for scheduled tasks.
pub type TaskResult<T> = Result<T, TaskError>;

/// Scheduler and task errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Invalid trigger or duplicate registration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The task body reported a failure.
    #[error("Task execution failed: {0}")]
    ExecutionFailed(String),

    /// The task body panicked.
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// No task registered under this name.
    #[error("Task not found: {0}")]
    NotFound(String),
}

impl TaskError {
    pub fn failed<T: Into<String>>(message: T) -> Self {
        Self::ExecutionFailed(message.into())
    }
}

//! Error types for media operations.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use clipper_models::OperationError;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while building or running an engine invocation.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Invalid operation: field `{field}` {reason}")]
    InvalidOperation { field: String, reason: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Engine not found: {0}")]
    EngineNotFound(String),

    #[error("Engine failed (exit code {exit_code:?}): {stderr}")]
    EngineFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Engine timed out after {} seconds", .0.as_secs())]
    ExecutionTimeout(Duration),

    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an invalid-operation error naming the offending field.
    pub fn invalid_operation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an engine failure error.
    pub fn engine_failure(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::EngineFailure {
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the error describes a bad request rather than a runtime fault.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MediaError::InvalidOperation { .. }
                | MediaError::UnsupportedOperation(_)
                | MediaError::SecurityViolation(_)
        )
    }
}

impl From<OperationError> for MediaError {
    fn from(err: OperationError) -> Self {
        match err {
            OperationError::Unsupported(tag) => MediaError::UnsupportedOperation(tag),
            OperationError::InvalidField { field, reason } => {
                MediaError::InvalidOperation { field, reason }
            }
        }
    }
}

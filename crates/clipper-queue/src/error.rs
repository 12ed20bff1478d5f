//! Queue error types.

use thiserror::Error;

use clipper_models::{JobId, JobState};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Cannot {action} job {job_id} in state {state}")]
    InvalidTransition {
        job_id: JobId,
        state: JobState,
        action: &'static str,
    },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn unknown_queue(name: impl Into<String>) -> Self {
        Self::UnknownQueue(name.into())
    }

    pub fn invalid_transition(job_id: &JobId, state: JobState, action: &'static str) -> Self {
        Self::InvalidTransition {
            job_id: job_id.clone(),
            state,
            action,
        }
    }

    /// Whether the call may succeed if repeated (backend unreachable).
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::ConnectionFailed(_) => true,
            QueueError::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }
}

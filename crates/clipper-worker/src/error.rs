//! Worker error types.

use thiserror::Error;

use clipper_media::MediaError;
use clipper_models::{ErrorKind, OperationError};
use clipper_queue::QueueError;
use clipper_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<OperationError> for WorkerError {
    fn from(err: OperationError) -> Self {
        Self::Media(err.into())
    }
}

impl WorkerError {
    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    /// Machine-readable category stored on failed jobs and error bodies.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::InvalidJob(_) => ErrorKind::Validation,
            WorkerError::Media(e) => match e {
                MediaError::InvalidOperation { .. }
                | MediaError::UnsupportedOperation(_)
                | MediaError::SecurityViolation(_) => ErrorKind::Validation,
                MediaError::InputNotFound(_) => ErrorKind::NotFound,
                MediaError::EngineNotFound(_) | MediaError::EngineFailure { .. } => {
                    ErrorKind::EngineFailure
                }
                MediaError::ExecutionTimeout(_) => ErrorKind::ExecutionTimeout,
                MediaError::Io(_) => ErrorKind::Storage,
                MediaError::Cancelled | MediaError::Internal(_) => ErrorKind::Internal,
            },
            WorkerError::Storage(e) => match e {
                StorageError::ProjectNotFound(_) | StorageError::ClipNotFound(_) => {
                    ErrorKind::NotFound
                }
                StorageError::InvalidSource { .. }
                | StorageError::InvalidProject(_)
                | StorageError::PathOutsideRoot(_) => ErrorKind::Validation,
                StorageError::Io(_) => ErrorKind::Storage,
            },
            WorkerError::Queue(e) => match e {
                QueueError::JobNotFound(_) => ErrorKind::NotFound,
                QueueError::UnknownQueue(_) => ErrorKind::Validation,
                _ => ErrorKind::Queue,
            },
            WorkerError::Io(_) => ErrorKind::Storage,
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// Engine failures and timeouts, I/O and queue faults are retried; bad
    /// requests, missing inputs and a missing engine binary are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Media(MediaError::EngineNotFound(_)) => false,
            WorkerError::Media(MediaError::Cancelled) => false,
            _ => matches!(
                self.kind(),
                ErrorKind::EngineFailure
                    | ErrorKind::ExecutionTimeout
                    | ErrorKind::Storage
                    | ErrorKind::Queue
            ),
        }
    }

    /// Whether the job was interrupted by shutdown rather than failing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Media(MediaError::Cancelled))
    }
}

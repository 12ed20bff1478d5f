//! Storage error types.

use std::path::PathBuf;
use thiserror::Error;

use clipper_models::{ClipId, ProjectId};

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("Clip not found: {0}")]
    ClipNotFound(ClipId),

    #[error("Source clip {source_clip} is not part of project {project}")]
    InvalidSource { project: ProjectId, source_clip: ClipId },

    #[error("Invalid project: {0}")]
    InvalidProject(String),

    #[error("Path escapes media root: {0}")]
    PathOutsideRoot(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn invalid_project(msg: impl Into<String>) -> Self {
        Self::InvalidProject(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ProjectNotFound(_) | Self::ClipNotFound(_))
    }
}

//! Shared data models for the Clipper backend.
//!
//! This crate provides Serde-serializable types for:
//! - Projects and their clip forests
//! - Transformation operations and fluent render options
//! - Queue jobs and their lifecycle state
//! - Timestamp parsing for trim requests

pub mod ids;
pub mod job;
pub mod operation;
pub mod project;
pub mod timestamp;

// Re-export common types
pub use ids::{ClipId, JobId, ProjectId};
pub use job::{
    ClipTarget, ErrorKind, Job, JobFailure, JobHandle, JobPayload, JobResult, JobState, JobTask,
};
pub use operation::{AudioOptions, Operation, OperationError, ResizeOptions, TransformOptions};
pub use project::{Clip, NewProject, Project, ProjectStatus};
pub use timestamp::{format_seconds, parse_timestamp, TimestampError};

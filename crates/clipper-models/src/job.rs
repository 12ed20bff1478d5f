//! Job definitions for queue processing.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::{ClipId, JobId, Operation, ProjectId, TransformOptions};

/// Job state in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the queue (new, or waiting for a retry)
    #[default]
    Queued,
    /// Delivered to a worker
    Active,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully, will not be retried
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Queued,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(JobState::Queued),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Machine-readable error classification shared by API bodies and failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    EngineFailure,
    ExecutionTimeout,
    Storage,
    Queue,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::EngineFailure => "engine_failure",
            ErrorKind::ExecutionTimeout => "execution_timeout",
            ErrorKind::Storage => "storage",
            ErrorKind::Queue => "queue",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a job does to its input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobTask {
    /// One operation on a clip
    Operation(Operation),
    /// Combined fluent render options
    Options(TransformOptions),
}

impl JobTask {
    pub fn name(&self) -> &'static str {
        match self {
            JobTask::Operation(op) => op.name(),
            JobTask::Options(_) => "render",
        }
    }
}

/// Project/clip a job output should be registered under.
///
/// Copied by value at submission so the queue never holds live references
/// into the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClipTarget {
    pub project_id: ProjectId,
    pub source_clip_id: ClipId,
}

/// Job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub task: JobTask,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ClipTarget>,
}

/// Outcome of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub output_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_id: Option<ClipId>,
    /// The output already existed (redelivered job), so the engine was not run
    #[serde(default)]
    pub skipped: bool,
}

/// A recorded execution failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A queued unit of work and its lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub payload: JobPayload,
    pub state: JobState,
    /// Failed executions so far
    pub attempts: u32,
    pub max_attempts: u32,
    /// How many times the job was handed to a worker
    #[serde(default)]
    pub deliveries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer: Option<String>,
    /// Backend delivery handle (stream entry ID for Redis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be delivered
    pub available_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(queue: impl Into<String>, payload: JobPayload, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            queue: queue.into(),
            payload,
            state: JobState::Queued,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            deliveries: 0,
            error: None,
            error_kind: None,
            result: None,
            consumer: None,
            delivery_id: None,
            created_at: now,
            available_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Hand the job to a worker.
    pub fn start(mut self, consumer: impl Into<String>) -> Self {
        self.state = JobState::Active;
        self.consumer = Some(consumer.into());
        self.deliveries += 1;
        self.started_at = Some(Utc::now());
        self
    }

    /// Mark job as completed.
    pub fn complete(mut self, result: JobResult) -> Self {
        self.state = JobState::Completed;
        self.result = Some(result);
        self.error = None;
        self.error_kind = None;
        self.finished_at = Some(Utc::now());
        self
    }

    /// Record a failed attempt and put the job back in the queue.
    pub fn retry(mut self, failure: JobFailure, available_at: DateTime<Utc>) -> Self {
        self.attempts += 1;
        self.state = JobState::Queued;
        self.error = Some(failure.message);
        self.error_kind = Some(failure.kind);
        self.consumer = None;
        self.delivery_id = None;
        self.available_at = available_at;
        self
    }

    /// Record a failed attempt and settle the job as failed.
    pub fn fail(mut self, failure: JobFailure) -> Self {
        self.attempts += 1;
        self.state = JobState::Failed;
        self.error = Some(failure.message);
        self.error_kind = Some(failure.kind);
        self.finished_at = Some(Utc::now());
        self
    }

    /// Return an interrupted delivery to the queue without counting an attempt.
    pub fn release(mut self) -> Self {
        self.state = JobState::Queued;
        self.consumer = None;
        self.delivery_id = None;
        self.available_at = Utc::now();
        self
    }

    /// Whether one more failure would still leave room for a retry.
    pub fn can_retry(&self) -> bool {
        self.attempts + 1 < self.max_attempts
    }

    /// Whether the job may be delivered at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Queued && self.available_at <= now
    }

    /// Client-facing handle.
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id.clone(),
            queue: self.queue.clone(),
            state: self.state,
            created_at: self.created_at,
        }
    }
}

/// Handle returned on enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub id: JobId,
    pub queue: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
}

//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job processing with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};

use clipper_models::{Job, JobId};

/// Job logger for structured logging with consistent formatting.
///
/// Every event carries the job ID, the queue and the task name.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    queue: String,
    operation: String,
}

impl JobLogger {
    /// Create a logger for a delivered job.
    pub fn for_job(job: &Job) -> Self {
        Self::new(&job.id, &job.queue, job.payload.task.name())
    }

    /// Create a new job logger for a specific job, queue and operation.
    pub fn new(job_id: &JobId, queue: &str, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            queue: queue.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Log the start of a job attempt.
    pub fn log_start(&self, attempt: u32, max_attempts: u32) {
        info!(
            job_id = %self.job_id,
            queue = %self.queue,
            operation = %self.operation,
            attempt,
            max_attempts,
            "Job started"
        );
    }

    /// Log a progress update during job execution.
    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            queue = %self.queue,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    /// Log a failed attempt that will be retried.
    pub fn log_retry(&self, attempt: u32, delay_ms: u128, message: &str) {
        warn!(
            job_id = %self.job_id,
            queue = %self.queue,
            operation = %self.operation,
            attempt,
            delay_ms = delay_ms as u64,
            "Job attempt failed, retrying: {}", message
        );
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            queue = %self.queue,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    /// Log a terminal failure.
    pub fn log_error(&self, kind: &str, message: &str) {
        error!(
            job_id = %self.job_id,
            queue = %self.queue,
            operation = %self.operation,
            error_kind = kind,
            "Job failed: {}", message
        );
    }

    /// Log the completion of a job.
    pub fn log_completion(&self, output: &str, skipped: bool) {
        info!(
            job_id = %self.job_id,
            queue = %self.queue,
            operation = %self.operation,
            output,
            skipped,
            "Job completed"
        );
    }

    /// Get the job ID.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Get the operation type.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            queue = %self.queue,
            operation = %self.operation
        )
    }
}

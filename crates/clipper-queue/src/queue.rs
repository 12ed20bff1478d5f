//! Job queue interface.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use clipper_models::{Job, JobFailure, JobHandle, JobId, JobPayload, JobResult, JobState};

use crate::error::QueueResult;

/// Job counts for one queue (or all queues).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub queued: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    /// Queued jobs waiting for a retry backoff to elapse
    pub delayed: u64,
}

impl QueueCounts {
    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Queued => self.queued,
            JobState::Active => self.active,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
        }
    }

    pub fn total(&self) -> u64 {
        self.queued + self.active + self.completed + self.failed
    }

    pub fn add(&mut self, other: &QueueCounts) {
        self.queued += other.queued;
        self.active += other.active;
        self.completed += other.completed;
        self.failed += other.failed;
        self.delayed += other.delayed;
    }
}

/// Ordered, named job queues.
///
/// Jobs in one queue are delivered in enqueue order. A delivered job is
/// `active` until the worker settles it with exactly one of `complete`,
/// `retry`, `fail` or `release`; any of these on a job that is not active
/// returns [`QueueError::InvalidTransition`](crate::QueueError::InvalidTransition).
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Names of the queues this backend serves.
    fn queue_names(&self) -> Vec<String>;

    /// Executions allowed per job.
    fn max_attempts(&self) -> u32;

    /// Append a job to the tail of `queue`.
    async fn enqueue(&self, queue: &str, payload: JobPayload) -> QueueResult<JobHandle>;

    /// Take the oldest due job, waiting up to `wait` for one to arrive.
    ///
    /// No two callers ever receive the same delivery.
    async fn dequeue(&self, queue: &str, consumer: &str, wait: Duration) -> QueueResult<Option<Job>>;

    /// Settle an active job as completed.
    async fn complete(&self, job_id: &JobId, result: JobResult) -> QueueResult<Job>;

    /// Count a failed attempt and redeliver the job after `delay`.
    async fn retry(&self, job_id: &JobId, failure: JobFailure, delay: Duration) -> QueueResult<Job>;

    /// Count a failed attempt and settle the job as failed.
    async fn fail(&self, job_id: &JobId, failure: JobFailure) -> QueueResult<Job>;

    /// Hand an interrupted job back without counting an attempt.
    async fn release(&self, job_id: &JobId) -> QueueResult<Job>;

    /// Redeliver jobs that have been active for longer than `min_idle`
    /// (left behind by a crashed worker). Returns how many were recovered.
    async fn recover_stale(&self, queue: &str, consumer: &str, min_idle: Duration) -> QueueResult<usize>;

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<Job>>;

    /// Jobs in `queue`, newest first, optionally filtered by state.
    async fn list(&self, queue: &str, state: Option<JobState>, limit: usize) -> QueueResult<Vec<Job>>;

    async fn counts(&self, queue: &str) -> QueueResult<QueueCounts>;

    /// Check backend connectivity.
    async fn ping(&self) -> QueueResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate() {
        let mut total = QueueCounts::default();
        total.add(&QueueCounts { queued: 1, active: 2, completed: 3, failed: 4, delayed: 1 });
        total.add(&QueueCounts { queued: 1, ..Default::default() });

        assert_eq!(total.get(JobState::Queued), 2);
        assert_eq!(total.total(), 11);
        assert_eq!(total.delayed, 1);
    }
}

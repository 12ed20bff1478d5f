//! Read-only view of queue state for dashboards.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use clipper_models::{ErrorKind, Job, JobId, JobState};

use crate::error::{QueueError, QueueResult};
use crate::queue::{JobQueue, QueueCounts};

/// Default and maximum page sizes for job listings.
pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 500;

/// Counts for one named queue.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub name: String,
    pub counts: QueueCounts,
}

/// Counts for every queue plus totals.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub queues: Vec<QueueSnapshot>,
    pub totals: QueueCounts,
    pub generated_at: DateTime<Utc>,
}

/// Per-job row shown in listings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub queue: String,
    pub state: JobState,
    pub task: String,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            queue: job.queue.clone(),
            state: job.state,
            task: job.payload.task.name().to_string(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            error: job.error.clone(),
            error_kind: job.error_kind,
            created_at: job.created_at,
            finished_at: job.finished_at,
        }
    }
}

/// Observer over a [`JobQueue`]. Exposes no way to change job state.
#[derive(Clone)]
pub struct JobMonitor {
    queue: Arc<dyn JobQueue>,
}

impl JobMonitor {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Counts for all queues.
    pub async fn snapshot(&self) -> QueueResult<MonitorSnapshot> {
        let mut queues = Vec::new();
        let mut totals = QueueCounts::default();

        for name in self.queue.queue_names() {
            let counts = self.queue.counts(&name).await?;
            totals.add(&counts);
            queues.push(QueueSnapshot { name, counts });
        }

        Ok(MonitorSnapshot {
            queues,
            totals,
            generated_at: Utc::now(),
        })
    }

    pub async fn queue(&self, name: &str) -> QueueResult<QueueSnapshot> {
        if !self.queue.queue_names().iter().any(|q| q == name) {
            return Err(QueueError::unknown_queue(name));
        }
        Ok(QueueSnapshot {
            name: name.to_string(),
            counts: self.queue.counts(name).await?,
        })
    }

    /// Newest jobs first, capped at [`MAX_LIST_LIMIT`].
    pub async fn jobs(&self, queue: &str, state: Option<JobState>, limit: Option<usize>) -> QueueResult<Vec<JobSummary>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
        let jobs = self.queue.list(queue, state, limit).await?;
        Ok(jobs.iter().map(JobSummary::from).collect())
    }

    /// Full job detail.
    pub async fn job(&self, job_id: &JobId) -> QueueResult<Option<Job>> {
        self.queue.get(job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryQueue;
    use clipper_models::{JobFailure, JobPayload, JobTask, TransformOptions};
    use std::path::PathBuf;
    use std::time::Duration;

    fn payload() -> JobPayload {
        JobPayload {
            input_path: PathBuf::from("/m/uploads/a.mp4"),
            output_path: PathBuf::from("/m/processed/b.mp4"),
            task: JobTask::Options(TransformOptions::default()),
            target: None,
        }
    }

    #[tokio::test]
    async fn test_snapshot_and_listing() {
        let queue = Arc::new(MemoryQueue::new(&["processing".to_string(), "rendering".to_string()], 1));
        let monitor = JobMonitor::new(queue.clone());

        queue.enqueue("processing", payload()).await.unwrap();
        let failed = queue.enqueue("rendering", payload()).await.unwrap();
        queue.dequeue("rendering", "w", Duration::ZERO).await.unwrap();
        queue
            .fail(&failed.id, JobFailure::new(ErrorKind::EngineFailure, "exit 1"))
            .await
            .unwrap();

        let snapshot = monitor.snapshot().await.unwrap();
        assert_eq!(snapshot.queues.len(), 2);
        assert_eq!(snapshot.totals.queued, 1);
        assert_eq!(snapshot.totals.failed, 1);

        let rendering = monitor.queue("rendering").await.unwrap();
        assert_eq!(rendering.counts.failed, 1);
        assert!(matches!(monitor.queue("nope").await, Err(QueueError::UnknownQueue(_))));

        let rows = monitor.jobs("rendering", Some(JobState::Failed), None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].task, "render");
        assert_eq!(rows[0].attempts, 1);
        assert_eq!(rows[0].error_kind, Some(ErrorKind::EngineFailure));

        let detail = monitor.job(&failed.id).await.unwrap().unwrap();
        assert_eq!(detail.state, JobState::Failed);
    }
}

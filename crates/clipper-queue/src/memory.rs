//! In-process job queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use clipper_models::{Job, JobFailure, JobHandle, JobId, JobPayload, JobResult, JobState};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::queue::{JobQueue, QueueCounts};

#[derive(Debug, Default)]
struct Lane {
    /// Due jobs in delivery order
    ready: VecDeque<JobId>,
    /// Jobs waiting for a retry backoff
    delayed: Vec<JobId>,
    /// Every job ever enqueued, oldest first
    history: Vec<JobId>,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    lanes: HashMap<String, Lane>,
}

impl Inner {
    fn lane_mut(&mut self, queue: &str) -> QueueResult<&mut Lane> {
        self.lanes
            .get_mut(queue)
            .ok_or_else(|| QueueError::unknown_queue(queue))
    }

    /// Move due delayed jobs to the ready tail, earliest first.
    fn promote_due(&mut self, queue: &str, now: DateTime<Utc>) -> QueueResult<()> {
        let Inner { jobs, lanes } = self;
        let lane = lanes.get_mut(queue).ok_or_else(|| QueueError::unknown_queue(queue))?;

        let mut due: Vec<(DateTime<Utc>, JobId)> = Vec::new();
        lane.delayed.retain(|id| match jobs.get(id) {
            Some(job) if job.available_at <= now => {
                due.push((job.available_at, id.clone()));
                false
            }
            Some(_) => true,
            None => false,
        });
        due.sort();
        lane.ready.extend(due.into_iter().map(|(_, id)| id));
        Ok(())
    }

    fn next_due(&self, queue: &str) -> Option<DateTime<Utc>> {
        let lane = self.lanes.get(queue)?;
        lane.delayed
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .map(|job| job.available_at)
            .min()
    }
}

/// Non-durable queue backed by process memory.
///
/// Delivery is serialized by a single mutex; waiting consumers park on a
/// per-queue [`Notify`].
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    notifiers: HashMap<String, Arc<Notify>>,
    names: Vec<String>,
    max_attempts: u32,
}

impl MemoryQueue {
    pub fn new(queues: &[String], max_attempts: u32) -> Self {
        let mut inner = Inner::default();
        let mut notifiers = HashMap::new();
        for name in queues {
            inner.lanes.insert(name.clone(), Lane::default());
            notifiers.insert(name.clone(), Arc::new(Notify::new()));
        }
        Self {
            inner: Mutex::new(inner),
            notifiers,
            names: queues.to_vec(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(&config.queues, config.max_attempts)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notifier(&self, queue: &str) -> QueueResult<Arc<Notify>> {
        self.notifiers
            .get(queue)
            .cloned()
            .ok_or_else(|| QueueError::unknown_queue(queue))
    }

    fn wake(&self, queue: &str) {
        if let Some(notify) = self.notifiers.get(queue) {
            notify.notify_one();
        }
    }

    /// Try to deliver one job. Also reports when the next delayed job is due.
    fn try_take(&self, queue: &str, consumer: &str) -> QueueResult<(Option<Job>, Option<DateTime<Utc>>)> {
        let mut inner = self.lock();
        inner.promote_due(queue, Utc::now())?;

        while let Some(id) = inner.lane_mut(queue)?.ready.pop_front() {
            let Some(job) = inner.jobs.remove(&id) else {
                continue;
            };
            if job.state != JobState::Queued {
                warn!(job_id = %id, state = %job.state, "Skipping non-queued job in ready list");
                inner.jobs.insert(id, job);
                continue;
            }
            let job = job.start(consumer);
            inner.jobs.insert(id, job.clone());
            return Ok((Some(job), None));
        }

        Ok((None, inner.next_due(queue)))
    }

    /// Apply a transition to an active job.
    fn settle<F>(&self, job_id: &JobId, action: &'static str, apply: F) -> QueueResult<Job>
    where
        F: FnOnce(Job, &mut Lane) -> Job,
    {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.remove(job_id) else {
            return Err(QueueError::JobNotFound(job_id.clone()));
        };
        if job.state != JobState::Active {
            let state = job.state;
            inner.jobs.insert(job_id.clone(), job);
            return Err(QueueError::invalid_transition(job_id, state, action));
        }

        let queue = job.queue.clone();
        let Some(lane) = inner.lanes.get_mut(&queue) else {
            inner.jobs.insert(job_id.clone(), job);
            return Err(QueueError::unknown_queue(queue));
        };
        let job = apply(job, lane);
        inner.jobs.insert(job_id.clone(), job.clone());
        drop(inner);

        if job.state == JobState::Queued {
            self.wake(&queue);
        }
        Ok(job)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    fn queue_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    async fn enqueue(&self, queue: &str, payload: JobPayload) -> QueueResult<JobHandle> {
        let job = Job::new(queue, payload, self.max_attempts);
        let handle = job.handle();
        {
            let mut inner = self.lock();
            let lane = inner.lane_mut(queue)?;
            lane.ready.push_back(job.id.clone());
            lane.history.push(job.id.clone());
            inner.jobs.insert(job.id.clone(), job);
        }
        self.wake(queue);

        info!(job_id = %handle.id, queue = queue, "Enqueued job");
        Ok(handle)
    }

    async fn dequeue(&self, queue: &str, consumer: &str, wait: Duration) -> QueueResult<Option<Job>> {
        let notify = self.notifier(queue)?;
        let deadline = Instant::now() + wait;

        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (job, next_due) = self.try_take(queue, consumer)?;
            if let Some(job) = job {
                debug!(job_id = %job.id, queue = queue, consumer = consumer, "Delivered job");
                return Ok(Some(job));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let mut wake_at = deadline;
            if let Some(due) = next_due {
                let until_due = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                wake_at = wake_at.min(now + until_due);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn complete(&self, job_id: &JobId, result: JobResult) -> QueueResult<Job> {
        self.settle(job_id, "complete", |job, _| job.complete(result))
    }

    async fn retry(&self, job_id: &JobId, failure: JobFailure, delay: Duration) -> QueueResult<Job> {
        let backoff = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let available_at = Utc::now() + backoff;
        self.settle(job_id, "retry", |job, lane| {
            let job = job.retry(failure, available_at);
            if delay.is_zero() {
                lane.ready.push_back(job.id.clone());
            } else {
                lane.delayed.push(job.id.clone());
            }
            job
        })
    }

    async fn fail(&self, job_id: &JobId, failure: JobFailure) -> QueueResult<Job> {
        self.settle(job_id, "fail", |job, _| job.fail(failure))
    }

    async fn release(&self, job_id: &JobId) -> QueueResult<Job> {
        self.settle(job_id, "release", |job, lane| {
            let job = job.release();
            lane.ready.push_back(job.id.clone());
            job
        })
    }

    async fn recover_stale(&self, queue: &str, _consumer: &str, min_idle: Duration) -> QueueResult<usize> {
        let min_idle = chrono::Duration::from_std(min_idle).unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - min_idle;

        let stale: Vec<JobId> = {
            let inner = self.lock();
            let lane = inner
                .lanes
                .get(queue)
                .ok_or_else(|| QueueError::unknown_queue(queue))?;
            lane.history
                .iter()
                .filter_map(|id| inner.jobs.get(id))
                .filter(|job| job.state == JobState::Active)
                .filter(|job| job.started_at.is_some_and(|t| t <= cutoff))
                .map(|job| job.id.clone())
                .collect()
        };

        let mut recovered = 0;
        for id in stale {
            match self.release(&id).await {
                Ok(_) => {
                    warn!(job_id = %id, queue = queue, "Recovered stale job");
                    recovered += 1;
                }
                Err(QueueError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(recovered)
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<Job>> {
        Ok(self.lock().jobs.get(job_id).cloned())
    }

    async fn list(&self, queue: &str, state: Option<JobState>, limit: usize) -> QueueResult<Vec<Job>> {
        let inner = self.lock();
        let lane = inner
            .lanes
            .get(queue)
            .ok_or_else(|| QueueError::unknown_queue(queue))?;

        Ok(lane
            .history
            .iter()
            .rev()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|job| state.map_or(true, |s| job.state == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn counts(&self, queue: &str) -> QueueResult<QueueCounts> {
        let inner = self.lock();
        let lane = inner
            .lanes
            .get(queue)
            .ok_or_else(|| QueueError::unknown_queue(queue))?;

        let now = Utc::now();
        let mut counts = QueueCounts::default();
        for job in lane.history.iter().filter_map(|id| inner.jobs.get(id)) {
            match job.state {
                JobState::Queued => {
                    counts.queued += 1;
                    if job.available_at > now {
                        counts.delayed += 1;
                    }
                }
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipper_models::{ErrorKind, JobTask, Operation};
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn queue() -> MemoryQueue {
        MemoryQueue::new(&["processing".to_string(), "rendering".to_string()], 3)
    }

    fn payload(n: usize) -> JobPayload {
        JobPayload {
            input_path: PathBuf::from(format!("/m/uploads/{n}.mp4")),
            output_path: PathBuf::from(format!("/m/processed/{n}.mp4")),
            task: JobTask::Operation(Operation::Grayscale),
            target: None,
        }
    }

    fn result() -> JobResult {
        JobResult {
            output_path: PathBuf::from("/m/processed/out.mp4"),
            url: None,
            clip_id: None,
            skipped: false,
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let q = queue();
        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(q.enqueue("processing", payload(n)).await.unwrap().id);
        }

        for expected in ids {
            let job = q.dequeue("processing", "w", Duration::ZERO).await.unwrap().unwrap();
            assert_eq!(job.id, expected);
            assert_eq!(job.state, JobState::Active);
        }
        assert!(q.dequeue("processing", "w", Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let q = queue();
        q.enqueue("rendering", payload(0)).await.unwrap();
        assert!(q.dequeue("processing", "w", Duration::ZERO).await.unwrap().is_none());
        assert!(q.dequeue("rendering", "w", Duration::ZERO).await.unwrap().is_some());
        assert!(matches!(
            q.enqueue("missing", payload(0)).await,
            Err(QueueError::UnknownQueue(_))
        ));
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let q = Arc::new(queue());
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.dequeue("processing", "w", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let handle = q.enqueue("processing", payload(0)).await.unwrap();

        let job = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(job.id, handle.id);
    }

    #[tokio::test]
    async fn test_dequeue_times_out() {
        let q = queue();
        let started = std::time::Instant::now();
        assert!(q.dequeue("processing", "w", Duration::from_millis(50)).await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_double_delivery() {
        let q = Arc::new(queue());
        for n in 0..200 {
            q.enqueue("processing", payload(n)).await.unwrap();
        }

        let workers: Vec<_> = (0..8)
            .map(|w| {
                let q = q.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(job) = q
                        .dequeue("processing", &format!("w{w}"), Duration::from_millis(20))
                        .await
                        .unwrap()
                    {
                        seen.push(job.id);
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        for worker in workers {
            for id in worker.await.unwrap() {
                assert!(all.insert(id), "job delivered twice");
            }
        }
        assert_eq!(all.len(), 200);
    }

    #[tokio::test]
    async fn test_retry_with_delay() {
        let q = queue();
        let handle = q.enqueue("processing", payload(0)).await.unwrap();
        q.dequeue("processing", "w", Duration::ZERO).await.unwrap().unwrap();

        let failure = JobFailure::new(ErrorKind::EngineFailure, "boom");
        let job = q.retry(&handle.id, failure, Duration::from_millis(100)).await.unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempts, 1);
        assert_eq!(q.counts("processing").await.unwrap().delayed, 1);

        // Not due yet
        assert!(q.dequeue("processing", "w", Duration::ZERO).await.unwrap().is_none());

        let job = q
            .dequeue("processing", "w", Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.id, handle.id);
        assert_eq!(job.deliveries, 2);
    }

    #[tokio::test]
    async fn test_settle_requires_active() {
        let q = queue();
        let handle = q.enqueue("processing", payload(0)).await.unwrap();

        assert!(matches!(
            q.complete(&handle.id, result()).await,
            Err(QueueError::InvalidTransition { state: JobState::Queued, .. })
        ));

        q.dequeue("processing", "w", Duration::ZERO).await.unwrap().unwrap();
        q.complete(&handle.id, result()).await.unwrap();

        let failure = JobFailure::new(ErrorKind::EngineFailure, "late");
        assert!(matches!(
            q.fail(&handle.id, failure).await,
            Err(QueueError::InvalidTransition { state: JobState::Completed, .. })
        ));
        assert!(matches!(
            q.complete(&JobId::new(), result()).await,
            Err(QueueError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_release_returns_to_tail() {
        let q = queue();
        let first = q.enqueue("processing", payload(0)).await.unwrap();
        let second = q.enqueue("processing", payload(1)).await.unwrap();

        q.dequeue("processing", "w", Duration::ZERO).await.unwrap().unwrap();
        let released = q.release(&first.id).await.unwrap();
        assert_eq!(released.attempts, 0);
        assert_eq!(released.state, JobState::Queued);

        let next = q.dequeue("processing", "w", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(next.id, second.id);
        let next = q.dequeue("processing", "w", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(next.id, first.id);
    }

    #[tokio::test]
    async fn test_recover_stale() {
        let q = queue();
        let stale = q.enqueue("processing", payload(0)).await.unwrap();
        q.dequeue("processing", "crashed", Duration::ZERO).await.unwrap().unwrap();
        let waiting = q.enqueue("processing", payload(1)).await.unwrap();

        assert_eq!(q.recover_stale("processing", "w", Duration::from_secs(60)).await.unwrap(), 0);
        assert_eq!(q.recover_stale("processing", "w", Duration::ZERO).await.unwrap(), 1);

        // Recovered deliveries queue behind jobs already waiting.
        let job = q.dequeue("processing", "w", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(job.id, waiting.id);
        let job = q.dequeue("processing", "w", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(job.id, stale.id);
        assert_eq!(job.consumer.as_deref(), Some("w"));
    }

    #[tokio::test]
    async fn test_delayed_count_excludes_due_jobs() {
        let q = queue();
        let handle = q.enqueue("processing", payload(0)).await.unwrap();
        q.dequeue("processing", "w", Duration::ZERO).await.unwrap().unwrap();

        let failure = JobFailure::new(ErrorKind::EngineFailure, "boom");
        q.retry(&handle.id, failure, Duration::from_millis(50)).await.unwrap();
        let counts = q.counts("processing").await.unwrap();
        assert_eq!((counts.queued, counts.delayed), (1, 1));

        // Backoff elapsed, nothing has dequeued since.
        tokio::time::sleep(Duration::from_millis(80)).await;
        let counts = q.counts("processing").await.unwrap();
        assert_eq!((counts.queued, counts.delayed), (1, 0));
        assert_eq!(counts.total(), 1);
    }

    #[tokio::test]
    async fn test_counts_and_list() {
        let q = queue();
        let a = q.enqueue("processing", payload(0)).await.unwrap();
        let b = q.enqueue("processing", payload(1)).await.unwrap();
        q.enqueue("processing", payload(2)).await.unwrap();

        q.dequeue("processing", "w", Duration::ZERO).await.unwrap();
        q.complete(&a.id, result()).await.unwrap();
        q.dequeue("processing", "w", Duration::ZERO).await.unwrap();
        q.fail(&b.id, JobFailure::new(ErrorKind::Validation, "bad")).await.unwrap();

        let counts = q.counts("processing").await.unwrap();
        assert_eq!((counts.queued, counts.active, counts.completed, counts.failed), (1, 0, 1, 1));

        let failed = q.list("processing", Some(JobState::Failed), 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error.as_deref(), Some("bad"));

        let all = q.list("processing", None, 2).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].id, b.id);
    }
}

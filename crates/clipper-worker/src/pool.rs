//! Worker pool.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use clipper_models::{Job, JobFailure};
use clipper_queue::{JobQueue, QueueError};

use crate::config::WorkerConfig;
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::TransformPipeline;
use crate::retry::{retry_async, FailureTracker, RetryConfig};

/// How long cancelled engines get to exit before workers are aborted.
const CANCEL_WAIT: Duration = Duration::from_secs(5);

struct WorkerContext {
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<TransformPipeline>,
    config: WorkerConfig,
    job_retry: RetryConfig,
    settle_retry: RetryConfig,
    poll_backoff: RetryConfig,
    cancel: watch::Sender<bool>,
}

/// Runs `concurrency` workers on every named queue plus a recovery task.
///
/// Each worker loops dequeue, execute, settle. The shutdown flag is checked
/// between iterations; in-flight jobs get `shutdown_grace` to finish before
/// their engines are cancelled and the jobs released back to the queue.
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
    consumer_name: String,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<JoinSet<()>>,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig, queue: Arc<dyn JobQueue>, pipeline: Arc<TransformPipeline>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (cancel, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        let ctx = WorkerContext {
            job_retry: config.job_retry(),
            settle_retry: RetryConfig::new("settle_job").with_max_retries(3),
            poll_backoff: RetryConfig::new("dequeue")
                .with_base_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(30)),
            queue,
            pipeline,
            config,
            cancel,
        };

        Self {
            ctx: Arc::new(ctx),
            consumer_name,
            shutdown,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Spawn the workers. Calling it again while running does nothing.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            warn!("Worker pool already started");
            return;
        }

        let config = &self.ctx.config;
        let job_timeout = self.ctx.pipeline.media_config().job_timeout;
        if config.recover_min_idle <= job_timeout {
            warn!(
                recover_min_idle_secs = config.recover_min_idle.as_secs(),
                job_timeout_secs = job_timeout.as_secs(),
                "Recovery idle time does not exceed the job timeout; running jobs may be redelivered"
            );
        }

        let queues = self.ctx.queue.queue_names();
        for queue_name in &queues {
            for index in 0..config.concurrency {
                let consumer = format!("{}-{}-{}", self.consumer_name, queue_name, index);
                tasks.spawn(run_worker(
                    Arc::clone(&self.ctx),
                    queue_name.clone(),
                    consumer,
                    self.shutdown.subscribe(),
                ));
            }
        }
        tasks.spawn(run_recovery(
            Arc::clone(&self.ctx),
            format!("{}-recovery", self.consumer_name),
            self.shutdown.subscribe(),
        ));

        info!(
            consumer = %self.consumer_name,
            queues = ?queues,
            concurrency = config.concurrency,
            "Worker pool started"
        );
    }

    /// Stop taking jobs, wait for in-flight ones, then cancel what is left.
    pub async fn shutdown(&self) {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        if tasks.is_empty() {
            return;
        }

        let _ = self.shutdown.send(true);
        let grace = self.ctx.config.shutdown_grace;
        info!("Stopping worker pool, waiting up to {:?} for in-flight jobs", grace);

        if drain(&mut tasks, grace).await {
            info!("Worker pool stopped");
            return;
        }

        warn!("Shutdown grace period elapsed, cancelling in-flight jobs");
        let _ = self.ctx.cancel.send(true);
        if !drain(&mut tasks, CANCEL_WAIT).await {
            warn!("Aborting {} unresponsive worker tasks", tasks.len());
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
        info!("Worker pool stopped");
    }
}

/// Wait for every task to finish. Returns false on timeout.
async fn drain(tasks: &mut JoinSet<()>, limit: Duration) -> bool {
    tokio::time::timeout(limit, async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!("Worker task panicked: {}", e);
                }
            }
        }
    })
    .await
    .is_ok()
}

async fn run_worker(
    ctx: Arc<WorkerContext>,
    queue_name: String,
    consumer: String,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(queue = %queue_name, consumer = %consumer, "Worker started");
    let mut failures = FailureTracker::new(3);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match ctx.queue.dequeue(&queue_name, &consumer, ctx.config.poll_wait).await {
            Ok(Some(job)) => {
                failures.record_success();
                let span = JobLogger::for_job(&job).create_span();
                process_job(&ctx, job).instrument(span).await;
            }
            Ok(None) => failures.record_success(),
            Err(e) => {
                if failures.record_failure() {
                    error!(queue = %queue_name, "Failed to dequeue: {}", e);
                }
                let delay = failures.backoff(&ctx.poll_backoff);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    }

    debug!(queue = %queue_name, consumer = %consumer, "Worker stopped");
}

/// Execute one delivery and settle it exactly once.
async fn process_job(ctx: &WorkerContext, job: Job) {
    let logger = JobLogger::for_job(&job);
    let task = job.payload.task.name();
    logger.log_start(job.attempts + 1, job.max_attempts);

    let executor = ctx.pipeline.executor().with_cancel(ctx.cancel.subscribe());
    metrics::adjust_jobs_in_flight(&job.queue, 1.0);
    let outcome = ctx.pipeline.execute_job(&job, &executor).await;
    metrics::adjust_jobs_in_flight(&job.queue, -1.0);

    match outcome {
        Ok(result) => {
            let output = result.output_path.display().to_string();
            let skipped = result.skipped;
            let settled = retry_async(&ctx.settle_retry, QueueError::is_transient, || {
                ctx.queue.complete(&job.id, result.clone())
            })
            .await
            .into_result();

            match settled {
                Ok(_) => {
                    logger.log_completion(&output, skipped);
                    metrics::record_job_completed(&job.queue, task);
                    if skipped {
                        metrics::record_job_skipped(&job.queue, task);
                    }
                    ctx.pipeline.job_settled(&job).await;
                }
                Err(e) => log_settle_error(&logger, e),
            }
        }
        Err(e) if e.is_cancelled() => {
            logger.log_warning("interrupted by shutdown, releasing job");
            if let Err(e) = ctx.queue.release(&job.id).await {
                log_settle_error(&logger, e);
            }
        }
        Err(e) => {
            let failure = JobFailure::new(e.kind(), e.to_string());

            if e.is_retryable() && job.can_retry() {
                // attempts counts earlier failures, so this is 2^(n-1) for the nth.
                let delay = ctx.job_retry.delay_for_attempt(job.attempts);
                logger.log_retry(job.attempts + 1, delay.as_millis(), &failure.message);

                let settled = retry_async(&ctx.settle_retry, QueueError::is_transient, || {
                    ctx.queue.retry(&job.id, failure.clone(), delay)
                })
                .await
                .into_result();
                match settled {
                    Ok(_) => metrics::record_job_retried(&job.queue, task),
                    Err(e) => log_settle_error(&logger, e),
                }
            } else {
                logger.log_error(failure.kind.as_str(), &failure.message);

                let kind = failure.kind;
                let settled = retry_async(&ctx.settle_retry, QueueError::is_transient, || {
                    ctx.queue.fail(&job.id, failure.clone())
                })
                .await
                .into_result();
                match settled {
                    Ok(_) => {
                        metrics::record_job_failed(&job.queue, task, kind.as_str());
                        ctx.pipeline.job_settled(&job).await;
                    }
                    Err(e) => log_settle_error(&logger, e),
                }
            }
        }
    }
}

fn log_settle_error(logger: &JobLogger, err: QueueError) {
    match err {
        QueueError::InvalidTransition { state, .. } => {
            debug!(job_id = logger.job_id(), state = %state, "Job was already settled elsewhere");
        }
        e => logger.log_warning(&format!("failed to settle job: {}", e)),
    }
}

/// Periodically hand back deliveries left active by crashed workers.
async fn run_recovery(ctx: Arc<WorkerContext>, consumer: String, mut shutdown_rx: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(ctx.config.recover_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                for queue_name in ctx.queue.queue_names() {
                    match ctx
                        .queue
                        .recover_stale(&queue_name, &consumer, ctx.config.recover_min_idle)
                        .await
                    {
                        Ok(0) => {}
                        Ok(count) => {
                            info!(queue = %queue_name, count, "Recovered stale jobs");
                            metrics::record_jobs_recovered(&queue_name, count);
                        }
                        Err(e) => warn!(queue = %queue_name, "Failed to recover stale jobs: {}", e),
                    }
                }
            }
        }
    }
}

//! Job queue using Redis Streams.
//!
//! Key layout (prefix `p`, queue `q`):
//!
//! ```text
//! p:job:{id}          job record (JSON)
//! p:stream:q          delivery stream, one entry per delivery, field `job` = id
//! p:workers           consumer group on every stream
//! p:index:q           zset of job ids by creation time
//! p:state:q:{state}   set of job ids per state
//! p:delayed:q         zset of job ids waiting for a retry, scored by due time
//! ```
//!
//! Entries are acknowledged and deleted once the job leaves `active`, so the
//! pending list only holds in-flight deliveries. Deliveries left pending by a
//! crashed worker are reclaimed with `XPENDING IDLE` + `XCLAIM`.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::Script;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use clipper_models::{Job, JobFailure, JobHandle, JobId, JobPayload, JobResult, JobState};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::queue::{JobQueue, QueueCounts};

/// Longest single XREADGROUP block, so delayed jobs get promoted while waiting.
const BLOCK_SLICE: Duration = Duration::from_secs(1);
/// Upper bound on entries handled per promotion or recovery pass.
const BATCH: usize = 100;

/// Compare-and-set a job record and move its id between state sets.
/// Returns "ok", "missing", or the job's current state.
const TRANSITION_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return 'missing'
end
local state = cjson.decode(current)['state']
if state ~= ARGV[1] then
    return state
end
redis.call('SET', KEYS[1], ARGV[2])
redis.call('SMOVE', KEYS[2], KEYS[3], ARGV[3])
return 'ok'
"#;

/// Move due delayed jobs onto the stream.
const PROMOTE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, id in ipairs(ids) do
    redis.call('ZREM', KEYS[1], id)
    redis.call('XADD', KEYS[2], '*', 'job', id)
end
return #ids
"#;

/// Durable queue on Redis Streams.
pub struct RedisQueue {
    client: redis::Client,
    config: QueueConfig,
    transition: Script,
    promote: Script,
}

impl RedisQueue {
    /// Create a new queue client.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            transition: Script::new(TRANSITION_SCRIPT),
            promote: Script::new(PROMOTE_SCRIPT),
        })
    }

    /// Create the consumer group on every stream (idempotent).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        for queue in &self.config.queues {
            let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(self.stream_key(queue))
                .arg(self.group())
                .arg("0")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;

            match result {
                Ok(()) => info!(queue = queue.as_str(), "Created consumer group"),
                Err(e) if e.to_string().contains("BUSYGROUP") => {
                    debug!(queue = queue.as_str(), "Consumer group already exists");
                }
                Err(e) => return Err(QueueError::Redis(e)),
            }
        }
        Ok(())
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    fn ensure_queue(&self, queue: &str) -> QueueResult<()> {
        if self.config.queues.iter().any(|q| q == queue) {
            Ok(())
        } else {
            Err(QueueError::unknown_queue(queue))
        }
    }

    fn group(&self) -> String {
        format!("{}:workers", self.config.key_prefix)
    }

    fn job_key(&self, job_id: &JobId) -> String {
        format!("{}:job:{}", self.config.key_prefix, job_id)
    }

    fn stream_key(&self, queue: &str) -> String {
        format!("{}:stream:{}", self.config.key_prefix, queue)
    }

    fn index_key(&self, queue: &str) -> String {
        format!("{}:index:{}", self.config.key_prefix, queue)
    }

    fn state_key(&self, queue: &str, state: JobState) -> String {
        format!("{}:state:{}:{}", self.config.key_prefix, queue, state.as_str())
    }

    fn delayed_key(&self, queue: &str) -> String {
        format!("{}:delayed:{}", self.config.key_prefix, queue)
    }

    async fn load(&self, conn: &mut MultiplexedConnection, job_id: &JobId) -> QueueResult<Option<Job>> {
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.job_key(job_id))
            .query_async(conn)
            .await?;
        raw.map(|s| serde_json::from_str(&s).map_err(QueueError::from))
            .transpose()
    }

    async fn load_many(&self, conn: &mut MultiplexedConnection, ids: &[String]) -> QueueResult<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids
            .iter()
            .map(|id| self.job_key(&JobId::from_string(id.as_str())))
            .collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(conn).await?;

        let mut jobs = Vec::with_capacity(raw.len());
        for value in raw.into_iter().flatten() {
            jobs.push(serde_json::from_str(&value)?);
        }
        Ok(jobs)
    }

    async fn load_active(
        &self,
        conn: &mut MultiplexedConnection,
        job_id: &JobId,
        action: &'static str,
    ) -> QueueResult<Job> {
        let job = self
            .load(conn, job_id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(job_id.clone()))?;
        if job.state != JobState::Active {
            return Err(QueueError::invalid_transition(job_id, job.state, action));
        }
        Ok(job)
    }

    /// Persist `job` if its stored state is still `from`.
    async fn store_transition(
        &self,
        conn: &mut MultiplexedConnection,
        from: JobState,
        job: &Job,
        action: &'static str,
    ) -> QueueResult<()> {
        let json = serde_json::to_string(job)?;
        let outcome: String = self
            .transition
            .key(self.job_key(&job.id))
            .key(self.state_key(&job.queue, from))
            .key(self.state_key(&job.queue, job.state))
            .arg(from.as_str())
            .arg(json)
            .arg(job.id.as_str())
            .invoke_async(conn)
            .await?;

        match outcome.as_str() {
            "ok" => Ok(()),
            "missing" => Err(QueueError::JobNotFound(job.id.clone())),
            other => {
                let state = other.parse().unwrap_or(from);
                Err(QueueError::invalid_transition(&job.id, state, action))
            }
        }
    }

    async fn push_entry(&self, conn: &mut MultiplexedConnection, queue: &str, job_id: &JobId) -> QueueResult<String> {
        let entry_id: String = redis::cmd("XADD")
            .arg(self.stream_key(queue))
            .arg("*")
            .arg("job")
            .arg(job_id.as_str())
            .query_async(conn)
            .await?;
        Ok(entry_id)
    }

    /// Acknowledge and delete a stream entry.
    async fn ack(&self, conn: &mut MultiplexedConnection, queue: &str, entry_id: &str) -> QueueResult<()> {
        let stream = self.stream_key(queue);
        let (): () = redis::pipe()
            .cmd("XACK")
            .arg(&stream)
            .arg(self.group())
            .arg(entry_id)
            .ignore()
            .cmd("XDEL")
            .arg(&stream)
            .arg(entry_id)
            .ignore()
            .query_async(conn)
            .await?;
        Ok(())
    }

    async fn promote_due(&self, conn: &mut MultiplexedConnection, queue: &str) -> QueueResult<()> {
        let promoted: i64 = self
            .promote
            .key(self.delayed_key(queue))
            .key(self.stream_key(queue))
            .arg(Utc::now().timestamp_millis())
            .arg(BATCH)
            .invoke_async(conn)
            .await?;
        if promoted > 0 {
            debug!(queue = queue, promoted = promoted, "Promoted delayed jobs");
        }
        Ok(())
    }

    /// Turn a freshly read stream entry into an active job.
    async fn accept_entry(
        &self,
        conn: &mut MultiplexedConnection,
        queue: &str,
        consumer: &str,
        entry: StreamId,
    ) -> QueueResult<Option<Job>> {
        let Some(raw_id) = entry.get::<String>("job") else {
            warn!(queue = queue, entry_id = entry.id.as_str(), "Dropping malformed stream entry");
            self.ack(conn, queue, &entry.id).await?;
            return Ok(None);
        };
        let job_id = JobId::from_string(raw_id);

        let job = match self.load(conn, &job_id).await? {
            Some(job) if job.state == JobState::Queued => job,
            Some(job) => {
                debug!(job_id = %job_id, state = %job.state, "Dropping stale stream entry");
                self.ack(conn, queue, &entry.id).await?;
                return Ok(None);
            }
            None => {
                warn!(job_id = %job_id, "Stream entry references missing job");
                self.ack(conn, queue, &entry.id).await?;
                return Ok(None);
            }
        };

        let mut started = job.start(consumer);
        started.delivery_id = Some(entry.id.clone());

        match self
            .store_transition(conn, JobState::Queued, &started, "deliver")
            .await
        {
            Ok(()) => Ok(Some(started)),
            Err(QueueError::InvalidTransition { .. }) | Err(QueueError::JobNotFound(_)) => {
                self.ack(conn, queue, &entry.id).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Move an active job out of `active` and retire its delivery entry.
    async fn settle(
        &self,
        job_id: &JobId,
        action: &'static str,
        apply: impl FnOnce(Job) -> Job + Send,
    ) -> QueueResult<(MultiplexedConnection, Job)> {
        let mut conn = self.conn().await?;
        let job = self.load_active(&mut conn, job_id, action).await?;
        let entry_id = job.delivery_id.clone();

        let settled = apply(job);
        self.store_transition(&mut conn, JobState::Active, &settled, action)
            .await?;

        if let Some(entry_id) = entry_id {
            self.ack(&mut conn, &settled.queue, &entry_id).await?;
        }
        Ok((conn, settled))
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    fn queue_names(&self) -> Vec<String> {
        self.config.queues.clone()
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    async fn enqueue(&self, queue: &str, payload: JobPayload) -> QueueResult<JobHandle> {
        self.ensure_queue(queue)?;
        let job = Job::new(queue, payload, self.config.max_attempts);
        let json = serde_json::to_string(&job)?;
        let mut conn = self.conn().await?;

        let (): () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.job_key(&job.id))
            .arg(json)
            .ignore()
            .cmd("ZADD")
            .arg(self.index_key(queue))
            .arg(job.created_at.timestamp_millis())
            .arg(job.id.as_str())
            .ignore()
            .cmd("SADD")
            .arg(self.state_key(queue, JobState::Queued))
            .arg(job.id.as_str())
            .ignore()
            .cmd("XADD")
            .arg(self.stream_key(queue))
            .arg("*")
            .arg("job")
            .arg(job.id.as_str())
            .ignore()
            .query_async(&mut conn)
            .await?;

        info!(job_id = %job.id, queue = queue, "Enqueued job");
        Ok(job.handle())
    }

    async fn dequeue(&self, queue: &str, consumer: &str, wait: Duration) -> QueueResult<Option<Job>> {
        self.ensure_queue(queue)?;
        let deadline = Instant::now() + wait;
        let mut conn = self.conn().await?;

        loop {
            self.promote_due(&mut conn, queue).await?;

            let block = deadline
                .saturating_duration_since(Instant::now())
                .min(BLOCK_SLICE);

            let mut cmd = redis::cmd("XREADGROUP");
            cmd.arg("GROUP").arg(self.group()).arg(consumer).arg("COUNT").arg(1);
            if !block.is_zero() {
                cmd.arg("BLOCK").arg(block.as_millis() as u64);
            }
            cmd.arg("STREAMS").arg(self.stream_key(queue)).arg(">");

            let reply: Option<StreamReadReply> = cmd.query_async(&mut conn).await?;
            let entry = reply
                .and_then(|r| r.keys.into_iter().next())
                .and_then(|k| k.ids.into_iter().next());

            if let Some(entry) = entry {
                if let Some(job) = self.accept_entry(&mut conn, queue, consumer, entry).await? {
                    debug!(job_id = %job.id, queue = queue, consumer = consumer, "Delivered job");
                    return Ok(Some(job));
                }
                continue;
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    async fn complete(&self, job_id: &JobId, result: JobResult) -> QueueResult<Job> {
        let (_, job) = self.settle(job_id, "complete", |job| job.complete(result)).await?;
        Ok(job)
    }

    async fn retry(&self, job_id: &JobId, failure: JobFailure, delay: Duration) -> QueueResult<Job> {
        let backoff = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let available_at = Utc::now() + backoff;
        let (mut conn, job) = self
            .settle(job_id, "retry", |job| job.retry(failure, available_at))
            .await?;

        if delay.is_zero() {
            self.push_entry(&mut conn, &job.queue, &job.id).await?;
        } else {
            let (): () = redis::cmd("ZADD")
                .arg(self.delayed_key(&job.queue))
                .arg(available_at.timestamp_millis())
                .arg(job.id.as_str())
                .query_async(&mut conn)
                .await?;
        }
        Ok(job)
    }

    async fn fail(&self, job_id: &JobId, failure: JobFailure) -> QueueResult<Job> {
        let (_, job) = self.settle(job_id, "fail", |job| job.fail(failure)).await?;
        Ok(job)
    }

    async fn release(&self, job_id: &JobId) -> QueueResult<Job> {
        let (mut conn, job) = self.settle(job_id, "release", Job::release).await?;
        self.push_entry(&mut conn, &job.queue, &job.id).await?;
        Ok(job)
    }

    async fn recover_stale(&self, queue: &str, consumer: &str, min_idle: Duration) -> QueueResult<usize> {
        self.ensure_queue(queue)?;
        let mut conn = self.conn().await?;
        let stream = self.stream_key(queue);
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&stream)
            .arg(self.group())
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(BATCH)
            .query_async(&mut conn)
            .await?;
        if pending.ids.is_empty() {
            return Ok(0);
        }

        let entry_ids: Vec<String> = pending.ids.into_iter().map(|p| p.id).collect();
        // XCLAIM re-checks idle time, so concurrent recoverers never both win.
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&stream)
            .arg(self.group())
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(&entry_ids)
            .query_async(&mut conn)
            .await?;

        let mut recovered = 0;
        for entry in claimed.ids {
            let job = match entry.get::<String>("job") {
                Some(raw) => self.load(&mut conn, &JobId::from_string(raw)).await?,
                None => None,
            };

            match job {
                Some(job)
                    if job.state == JobState::Active
                        && job.delivery_id.as_deref() == Some(entry.id.as_str()) =>
                {
                    match self.release(&job.id).await {
                        Ok(_) => {
                            warn!(job_id = %job.id, queue = queue, "Recovered stale job");
                            recovered += 1;
                        }
                        Err(QueueError::InvalidTransition { .. }) => {
                            self.ack(&mut conn, queue, &entry.id).await?;
                        }
                        Err(e) => return Err(e),
                    }
                }
                // Read but never accepted: the reader died before marking it active.
                Some(job) if job.state == JobState::Queued => {
                    self.push_entry(&mut conn, queue, &job.id).await?;
                    self.ack(&mut conn, queue, &entry.id).await?;
                    warn!(job_id = %job.id, queue = queue, "Recovered unaccepted delivery");
                    recovered += 1;
                }
                _ => self.ack(&mut conn, queue, &entry.id).await?,
            }
        }
        Ok(recovered)
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.conn().await?;
        self.load(&mut conn, job_id).await
    }

    async fn list(&self, queue: &str, state: Option<JobState>, limit: usize) -> QueueResult<Vec<Job>> {
        self.ensure_queue(queue)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;

        let ids: Vec<String> = match state {
            Some(state) => {
                redis::cmd("SMEMBERS")
                    .arg(self.state_key(queue, state))
                    .query_async(&mut conn)
                    .await?
            }
            None => {
                redis::cmd("ZREVRANGE")
                    .arg(self.index_key(queue))
                    .arg(0)
                    .arg(limit as i64 - 1)
                    .query_async(&mut conn)
                    .await?
            }
        };

        let mut jobs = self.load_many(&mut conn, &ids).await?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn counts(&self, queue: &str) -> QueueResult<QueueCounts> {
        self.ensure_queue(queue)?;
        let mut conn = self.conn().await?;
        let now_ms = Utc::now().timestamp_millis();

        let (queued, active, completed, failed, delayed): (u64, u64, u64, u64, u64) = redis::pipe()
            .cmd("SCARD")
            .arg(self.state_key(queue, JobState::Queued))
            .cmd("SCARD")
            .arg(self.state_key(queue, JobState::Active))
            .cmd("SCARD")
            .arg(self.state_key(queue, JobState::Completed))
            .cmd("SCARD")
            .arg(self.state_key(queue, JobState::Failed))
            // Entries already due are counted as plain queued.
            .cmd("ZCOUNT")
            .arg(self.delayed_key(queue))
            .arg(format!("({}", now_ms))
            .arg("+inf")
            .query_async(&mut conn)
            .await?;

        Ok(QueueCounts {
            queued,
            active,
            completed,
            failed,
            delayed,
        })
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

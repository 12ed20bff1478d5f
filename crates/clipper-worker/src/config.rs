//! Worker configuration.

use std::time::Duration;

use crate::retry::RetryConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Workers started per named queue
    pub concurrency: usize,
    /// How long a worker blocks on an empty queue before re-checking shutdown
    pub poll_wait: Duration,
    /// Time in-flight jobs get to finish after shutdown is signalled
    pub shutdown_grace: Duration,
    /// How often the pool scans for deliveries abandoned by a crashed worker
    pub recover_interval: Duration,
    /// Minimum time a job must have been active before it is recovered.
    /// Must exceed the engine timeout or live jobs get redelivered.
    pub recover_min_idle: Duration,
    /// First retry delay; doubles with every failed attempt
    pub retry_base_delay: Duration,
    /// Upper bound on the retry delay
    pub retry_max_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_wait: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(30),
            recover_interval: Duration::from_secs(60),
            recover_min_idle: Duration::from_secs(900), // 15 minutes
            retry_base_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_secs(60),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: std::env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.concurrency),
            poll_wait: std::env::var("WORKER_POLL_WAIT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_wait),
            shutdown_grace: std::env::var("WORKER_SHUTDOWN_GRACE")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace),
            recover_interval: std::env::var("WORKER_RECOVER_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.recover_interval),
            recover_min_idle: std::env::var("WORKER_RECOVER_MIN_IDLE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.recover_min_idle),
            retry_base_delay: std::env::var("RETRY_BASE_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            retry_max_delay: std::env::var("RETRY_MAX_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_max_delay),
        }
    }

    /// Backoff policy for failed job attempts.
    pub fn job_retry(&self) -> RetryConfig {
        RetryConfig::new("job")
            .with_base_delay(self.retry_base_delay)
            .with_max_delay(self.retry_max_delay)
    }
}

//! Queue configuration.

/// Queue for per-clip operations.
pub const PROCESSING_QUEUE: &str = "processing";
/// Queue for option-set render jobs.
pub const RENDERING_QUEUE: &str = "rendering";

/// Queue storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    /// In-process, lost on restart
    Memory,
    /// Redis Streams, durable
    Redis,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every Redis key
    pub key_prefix: String,
    /// Named queues to create
    pub queues: Vec<String>,
    /// Executions allowed per job before it settles as failed
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "clipper".to_string(),
            queues: vec![PROCESSING_QUEUE.to_string(), RENDERING_QUEUE.to_string()],
            max_attempts: 3,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend: match std::env::var("QUEUE_BACKEND").as_deref() {
                Ok("redis") => QueueBackend::Redis,
                _ => QueueBackend::Memory,
            },
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("QUEUE_PREFIX").unwrap_or(defaults.key_prefix),
            queues: std::env::var("QUEUE_NAMES")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|q| q.trim().to_string())
                        .filter(|q| !q.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|q| !q.is_empty())
                .unwrap_or(defaults.queues),
            max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
        }
    }
}

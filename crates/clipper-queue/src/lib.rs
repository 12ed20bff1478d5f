//! Job queues for Clipper.
//!
//! This crate provides:
//! - The `JobQueue` interface: FIFO named queues with explicit job state
//! - An in-memory backend for embedded use and tests
//! - A Redis Streams backend with consumer groups and crash recovery
//! - A read-only `JobMonitor` projection for dashboards

pub mod config;
pub mod error;
pub mod memory;
pub mod monitor;
pub mod queue;
pub mod redis_queue;

pub use config::{QueueBackend, QueueConfig, PROCESSING_QUEUE, RENDERING_QUEUE};
pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use monitor::{JobMonitor, JobSummary, MonitorSnapshot, QueueSnapshot};
pub use queue::{JobQueue, QueueCounts};
pub use redis_queue::RedisQueue;

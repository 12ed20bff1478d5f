//! Transformation pipeline and queue workers.
//!
//! This crate provides:
//! - `TransformPipeline`, shared by direct requests and queued jobs
//! - `WorkerPool`, N workers per named queue with retry and crash recovery
//! - Retry/backoff policy and structured job logging
//! - Graceful shutdown with a grace period for in-flight engine runs

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod retry;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use pipeline::{ClipPlan, ProcessedClip, TransformPipeline};
pub use pool::WorkerPool;
pub use retry::{retry_async, FailureTracker, RetryConfig, RetryResult};

#[cfg(all(test, unix))]
mod testing;

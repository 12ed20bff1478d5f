//! Job lifecycle metrics.

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_ENQUEUED_TOTAL: &str = "clipper_jobs_enqueued_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "clipper_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "clipper_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "clipper_jobs_retried_total";
    pub const JOBS_SKIPPED_TOTAL: &str = "clipper_jobs_skipped_total";
    pub const JOBS_RECOVERED_TOTAL: &str = "clipper_jobs_recovered_total";
    pub const JOBS_IN_FLIGHT: &str = "clipper_jobs_in_flight";
    pub const DIRECT_TRANSFORMS_TOTAL: &str = "clipper_direct_transforms_total";
}

fn labels(queue: &str, task: &str) -> [(&'static str, String); 2] {
    [("queue", queue.to_string()), ("task", task.to_string())]
}

/// Record job enqueued.
pub fn record_job_enqueued(queue: &str, task: &str) {
    counter!(names::JOBS_ENQUEUED_TOTAL, &labels(queue, task)).increment(1);
}

/// Record job completed.
pub fn record_job_completed(queue: &str, task: &str) {
    counter!(names::JOBS_COMPLETED_TOTAL, &labels(queue, task)).increment(1);
}

/// Record job settled as failed.
pub fn record_job_failed(queue: &str, task: &str, kind: &str) {
    let labels = [
        ("queue", queue.to_string()),
        ("task", task.to_string()),
        ("kind", kind.to_string()),
    ];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Record a failed attempt scheduled for another try.
pub fn record_job_retried(queue: &str, task: &str) {
    counter!(names::JOBS_RETRIED_TOTAL, &labels(queue, task)).increment(1);
}

/// Record a redelivered job whose output already existed.
pub fn record_job_skipped(queue: &str, task: &str) {
    counter!(names::JOBS_SKIPPED_TOTAL, &labels(queue, task)).increment(1);
}

/// Record jobs recovered from a crashed worker.
pub fn record_jobs_recovered(queue: &str, count: usize) {
    let labels = [("queue", queue.to_string())];
    counter!(names::JOBS_RECOVERED_TOTAL, &labels).increment(count as u64);
}

/// Track jobs currently executing.
pub fn adjust_jobs_in_flight(queue: &str, delta: f64) {
    let labels = [("queue", queue.to_string())];
    gauge!(names::JOBS_IN_FLIGHT, &labels).increment(delta);
}

/// Record a synchronous transformation by outcome.
pub fn record_direct_transform(operation: &str, outcome: &str) {
    let labels = [
        ("operation", operation.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(names::DIRECT_TRANSFORMS_TOTAL, &labels).increment(1);
}

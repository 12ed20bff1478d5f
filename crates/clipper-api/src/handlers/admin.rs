//! Queue dashboard handlers.
//!
//! Read-only: nothing here changes job state.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use clipper_models::{Job, JobState};
use clipper_queue::{JobSummary, MonitorSnapshot, QueueError, QueueSnapshot};

use crate::error::{ApiError, ApiResult};
use crate::handlers::jobs::find_job;
use crate::state::AppState;

/// Filters for a job listing.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    pub state: Option<JobState>,
    pub limit: Option<usize>,
}

/// One queue's counts plus its newest jobs.
#[derive(Debug, Serialize)]
pub struct QueueJobsResponse {
    pub queue: QueueSnapshot,
    pub jobs: Vec<JobSummary>,
}

/// Counts for every queue.
pub async fn queue_overview(State(state): State<AppState>) -> ApiResult<Json<MonitorSnapshot>> {
    Ok(Json(state.monitor.snapshot().await?))
}

/// Jobs in one queue, newest first.
pub async fn queue_jobs(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    query: Result<Query<JobListQuery>, QueryRejection>,
) -> ApiResult<Json<QueueJobsResponse>> {
    let Query(query) = query?;

    let snapshot = state.monitor.queue(&queue).await.map_err(|e| match e {
        QueueError::UnknownQueue(name) => ApiError::not_found(format!("Queue {} not found", name)),
        other => other.into(),
    })?;
    let jobs = state.monitor.jobs(&queue, query.state, query.limit).await?;

    Ok(Json(QueueJobsResponse {
        queue: snapshot,
        jobs,
    }))
}

/// Full job record including payload and result.
pub async fn job_detail(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<Job>> {
    find_job(&state, job_id).await.map(Json)
}

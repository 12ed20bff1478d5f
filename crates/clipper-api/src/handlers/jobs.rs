//! Job status handlers.

use axum::extract::{Path, State};
use axum::Json;

use clipper_models::{Job, JobId};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Job detail for clients polling a queued transformation.
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<Job>> {
    find_job(&state, job_id).await.map(Json)
}

pub(crate) async fn find_job(state: &AppState, job_id: String) -> ApiResult<Job> {
    let job_id = JobId::from_string(job_id);
    state
        .monitor
        .job(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Job {} not found", job_id)))
}

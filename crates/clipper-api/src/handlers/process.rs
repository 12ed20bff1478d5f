//! Transformation handlers.

use std::path::Path;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use clipper_models::{Clip, ClipId, JobHandle, Operation, ProjectId, TransformOptions};
use clipper_queue::{PROCESSING_QUEUE, RENDERING_QUEUE};

use crate::error::ApiResult;
use crate::state::AppState;

/// How a process request is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessMode {
    /// Run the engine inside the request
    #[default]
    Direct,
    /// Enqueue a job and return its handle
    Queued,
}

/// Request body for `POST /api/process`.
///
/// Operation parameters sit next to the named fields, e.g.
/// `{"projectId": "...", "clipId": "...", "operation": "trim", "start": 5, "duration": 10}`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    #[validate(length(min = 1, message = "projectId is required"))]
    pub project_id: String,
    #[validate(length(min = 1, message = "clipId is required"))]
    pub clip_id: String,
    #[validate(length(min = 1, message = "operation is required"))]
    pub operation: String,
    #[serde(default)]
    pub mode: ProcessMode,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// Direct-mode response.
#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub success: bool,
    pub clip: Clip,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Response for accepted jobs.
#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub success: bool,
    pub job: JobHandle,
}

/// Apply one operation to a clip.
///
/// The operation is parsed before any lookup, so an unsupported name is a
/// 400 even for unknown projects.
pub async fn process_clip(
    State(state): State<AppState>,
    payload: Result<Json<ProcessRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload?;
    request.validate()?;

    let operation = Operation::from_request(&request.operation, &request.params)?;
    let project_id = ProjectId::from_string(request.project_id);
    let clip_id = ClipId::from_string(request.clip_id);

    match request.mode {
        ProcessMode::Direct => {
            let processed = state.pipeline.run_direct(&project_id, &clip_id, operation).await?;
            Ok(Json(ProcessResponse {
                success: true,
                clip: processed.clip,
                url: processed.url,
            })
            .into_response())
        }
        ProcessMode::Queued => {
            let job = state
                .pipeline
                .submit_clip_job(state.queue.as_ref(), PROCESSING_QUEUE, &project_id, &clip_id, operation)
                .await?;
            Ok(accepted(job))
        }
    }
}

/// Request body for `POST /api/render`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    #[validate(length(min = 1, message = "inputPath is required"))]
    pub input_path: String,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub options: TransformOptions,
}

/// Enqueue an option-set render on the rendering queue.
pub async fn render_video(
    State(state): State<AppState>,
    payload: Result<Json<RenderRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload?;
    request.validate()?;

    let job = state
        .pipeline
        .submit_render_job(
            state.queue.as_ref(),
            RENDERING_QUEUE,
            Path::new(&request.input_path),
            request.output_path.as_deref().map(Path::new),
            request.options,
        )
        .await?;
    Ok(accepted(job))
}

fn accepted(job: JobHandle) -> Response {
    (StatusCode::ACCEPTED, Json(JobAccepted { success: true, job })).into_response()
}

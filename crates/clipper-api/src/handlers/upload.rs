//! Video upload handler.

use std::path::PathBuf;

use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use clipper_media::{move_file, remove_if_exists, UPLOAD_PREFIX};
use clipper_models::{Clip, ProjectId};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Multipart field carrying the file.
pub const VIDEO_FIELD: &str = "video";
/// Multipart field naming the target project.
pub const PROJECT_FIELD: &str = "projectId";

/// Upload written to a staging file, not yet registered.
#[derive(Debug)]
struct StagedVideo {
    original_name: String,
    filename: String,
    mime_type: String,
    staging_path: PathBuf,
    size: u64,
}

#[derive(Debug, Default)]
struct UploadForm {
    project_id: Option<String>,
    video: Option<StagedVideo>,
}

/// Accept one video file and register it as a root clip of a project.
///
/// The file is streamed to a staging name and only moved into the uploads
/// directory once the whole form has been read and the project exists.
pub async fn upload_video(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<(StatusCode, Json<Clip>)> {
    let mut multipart = multipart.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let mut form = UploadForm::default();
    let result = match read_form(&state, &mut multipart, &mut form).await {
        Ok(()) => register(&state, &form).await,
        Err(e) => Err(e),
    };

    if let (Err(e), Some(video)) = (&result, &form.video) {
        warn!(filename = %video.filename, "Discarding upload: {}", e);
        remove_if_exists(&video.staging_path).await;
    }

    result.map(|clip| (StatusCode::CREATED, Json(clip)))
}

async fn read_form(state: &AppState, multipart: &mut Multipart, form: &mut UploadForm) -> ApiResult<()> {
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(PROJECT_FIELD) => {
                form.project_id = Some(field.text().await?.trim().to_string());
            }
            Some(VIDEO_FIELD) => {
                if form.video.is_some() {
                    return Err(ApiError::bad_request("Only one video file may be uploaded"));
                }
                stage_video(state, field, form).await?;
            }
            _ => {}
        }
    }
    Ok(())
}

async fn stage_video(state: &AppState, mut field: Field<'_>, form: &mut UploadForm) -> ApiResult<()> {
    let mime_type = field.content_type().unwrap_or_default().to_string();
    if !mime_type.starts_with("video/") {
        return Err(ApiError::bad_request("Only video files are allowed"));
    }

    let original_name = field.file_name().unwrap_or(VIDEO_FIELD).to_string();
    let filename = state.pipeline.namer().next_name(UPLOAD_PREFIX, &original_name, None);
    let staging_path = state.artifacts().upload_path(&format!(".tmp-{}", filename));

    let mut file = tokio::fs::File::create(&staging_path).await?;
    form.video = Some(StagedVideo {
        original_name,
        filename,
        mime_type,
        staging_path,
        size: 0,
    });

    let limit = state.config.max_upload_bytes as u64;
    let mut size = 0u64;
    while let Some(chunk) = field.chunk().await? {
        size += chunk.len() as u64;
        if size > limit {
            return Err(ApiError::payload_too_large(format!(
                "video exceeds the {} byte limit",
                limit
            )));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    if let Some(video) = form.video.as_mut() {
        video.size = size;
    }
    Ok(())
}

async fn register(state: &AppState, form: &UploadForm) -> ApiResult<Clip> {
    let video = form
        .video
        .as_ref()
        .ok_or_else(|| ApiError::bad_request("No video file uploaded"))?;
    let project_id = form
        .project_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("Project ID is required"))?;
    if video.size == 0 {
        return Err(ApiError::bad_request("Uploaded video is empty"));
    }

    let project_id = ProjectId::from_string(project_id);
    // Fail before moving anything into the served directory.
    state.repository.get_project(&project_id).await?;

    let path = state.artifacts().upload_path(&video.filename);
    move_file(&video.staging_path, &path).await?;

    let clip = Clip::upload(
        video.original_name.as_str(),
        video.filename.as_str(),
        path.clone(),
        video.size,
        video.mime_type.as_str(),
    );
    let clip = match state.repository.append_clip(&project_id, clip).await {
        Ok(clip) => clip,
        Err(e) => {
            remove_if_exists(&path).await;
            return Err(e.into());
        }
    };

    metrics::record_upload(&clip.mime_type, clip.size);
    info!(
        project_id = %project_id,
        clip_id = %clip.id,
        filename = %clip.filename,
        size = clip.size,
        "Video uploaded"
    );
    Ok(clip)
}

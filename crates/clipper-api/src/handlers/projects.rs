//! Project handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use clipper_models::{NewProject, Project, ProjectId};

use crate::error::ApiResult;
use crate::state::AppState;

/// Request body for creating a project.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    #[validate(length(min = 1, max = 200, message = "name must be 1-200 characters"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 2000, message = "description must be at most 2000 characters"))]
    pub description: String,
}

/// List all projects, oldest first.
pub async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<Project>>> {
    let projects = state.repository.list_projects().await?;
    Ok(Json(projects))
}

/// Create an empty draft project.
pub async fn create_project(
    State(state): State<AppState>,
    payload: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let Json(request) = payload?;
    request.validate()?;

    let project = state
        .repository
        .create_project(NewProject {
            name: request.name,
            description: request.description,
        })
        .await?;

    info!(project_id = %project.id, name = %project.name, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

/// Get one project with its clips.
pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Project>> {
    let project = state
        .repository
        .get_project(&ProjectId::from_string(project_id))
        .await?;
    Ok(Json(project))
}

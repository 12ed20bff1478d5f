//! API routes.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;

use crate::handlers::{
    create_project, get_job, get_project, health, job_detail, list_projects, process_clip,
    queue_jobs, queue_overview, ready, render_video, upload_video,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging, require_admin, security_headers};
use crate::state::AppState;

/// Room for multipart boundaries and the project field on top of the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let upload_routes = Router::new()
        .route("/upload", post(upload_video))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(
            state.config.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD),
        ));

    let api_routes = Router::new()
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/:project_id", get(get_project))
        .route("/process", post(process_clip))
        .route("/render", post(render_video))
        .route("/jobs/:job_id", get(get_job))
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .merge(upload_routes);

    let admin_routes = Router::new()
        .route("/queues", get(queue_overview))
        .route("/queues/:queue/jobs", get(queue_jobs))
        .route("/jobs/:job_id", get(job_detail))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let artifacts = state.artifacts();
    let static_routes = Router::new()
        .nest_service("/uploads", ServeDir::new(artifacts.uploads_dir()))
        .nest_service("/processed", ServeDir::new(artifacts.processed_dir()));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .nest("/admin", admin_routes)
        .merge(static_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

//! Prometheus metrics for the API server.

use std::sync::LazyLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "clipper_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "clipper_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "clipper_http_requests_in_flight";
    pub const UPLOADS_TOTAL: &str = "clipper_uploads_total";
    pub const UPLOAD_BYTES_TOTAL: &str = "clipper_upload_bytes_total";
}

/// Path patterns collapsed to placeholders, most specific first.
static PATH_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"^/(uploads|processed)/.+$", "/$1/:file"),
        (r"/projects/[^/]+", "/projects/:project_id"),
        (r"/jobs/[^/]+", "/jobs/:job_id"),
        (r"/queues/[^/]+", "/queues/:queue"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record an accepted upload.
pub fn record_upload(mime_type: &str, bytes: u64) {
    let labels = [("mime_type", mime_type.to_string())];
    counter!(names::UPLOADS_TOTAL, &labels).increment(1);
    counter!(names::UPLOAD_BYTES_TOTAL).increment(bytes);
}

/// Sanitize path for metrics labels (remove IDs, file names).
fn sanitize_path(path: &str) -> String {
    let mut path = path.to_string();
    for (pattern, replacement) in PATH_PATTERNS.iter() {
        path = pattern.replace_all(&path, *replacement).into_owned();
    }
    path
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/projects/550e8400-e29b-41d4-a716-446655440000"),
            "/api/projects/:project_id"
        );
        assert_eq!(sanitize_path("/api/jobs/abc123"), "/api/jobs/:job_id");
        assert_eq!(
            sanitize_path("/admin/queues/processing/jobs"),
            "/admin/queues/:queue/jobs"
        );
        assert_eq!(
            sanitize_path("/processed/processed-1_0_abcd1234-cat.mp4"),
            "/processed/:file"
        );
        assert_eq!(sanitize_path("/api/upload"), "/api/upload");
    }
}

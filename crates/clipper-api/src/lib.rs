//! Axum HTTP API server.
//!
//! This crate provides:
//! - Project, upload and transformation endpoints
//! - Job polling and a read-only queue dashboard behind a bearer token
//! - Static serving of uploaded and processed artifacts
//! - The embedded worker pool and its graceful shutdown
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;

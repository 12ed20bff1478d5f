//! FFmpeg CLI wrapper for Clipper transformations.
//!
//! This crate provides:
//! - Argument-vector FFmpeg invocation building for every operation
//! - Subprocess execution with timeout, cancellation and output capture
//! - Collision-free output file naming
//! - Cross-device file moves for uploads

pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod fs_utils;
pub mod naming;

pub use command::{build_invocation, build_pipeline, FfmpegCommand, InvocationSpec};
pub use config::MediaConfig;
pub use error::{MediaError, MediaResult};
pub use executor::{ExecutionResult, TransformExecutor};
pub use fs_utils::{is_non_empty_file, move_file, remove_if_exists};
pub use naming::{sanitize_basename, OutputNamer, PROCESSED_PREFIX, UPLOAD_PREFIX};

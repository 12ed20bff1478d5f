//! Storage backend for Clipper.
//!
//! This crate provides:
//! - The `ProjectRepository` interface with transactional clip appends
//! - An in-memory repository with per-project locking
//! - Artifact directory layout and public URL mapping

pub mod artifacts;
pub mod config;
pub mod error;
pub mod repository;

pub use artifacts::ArtifactStore;
pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};
pub use repository::{MemoryRepository, ProjectRepository};

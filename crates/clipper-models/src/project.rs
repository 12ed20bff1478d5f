//! Projects and clips.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{ClipId, Operation, ProjectId};

/// Project lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Only uploads so far
    #[default]
    Draft,
    /// At least one transformation is in flight
    Processing,
    /// At least one derived clip exists and nothing is in flight
    Complete,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Processing => "processing",
            ProjectStatus::Complete => "complete",
        }
    }
}

/// Request payload for creating a project.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A project: an ordered collection of clips forming a forest.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub status: ProjectStatus,
    pub clips: Vec<Clip>,
}

impl Project {
    /// Create an empty draft project.
    pub fn new(request: NewProject) -> Self {
        Self {
            id: ProjectId::new(),
            name: request.name,
            description: request.description,
            created_at: Utc::now(),
            status: ProjectStatus::Draft,
            clips: Vec::new(),
        }
    }

    /// Find a clip by ID.
    pub fn clip(&self, clip_id: &ClipId) -> Option<&Clip> {
        self.clips.iter().find(|c| &c.id == clip_id)
    }

    /// Whether any clip was produced by a transformation.
    pub fn has_derived_clips(&self) -> bool {
        self.clips.iter().any(Clip::is_derived)
    }
}

/// A video asset: an upload or the output of one operation on another clip.
///
/// Clips are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub id: ClipId,
    /// Name of the file the user uploaded (inherited by derived clips)
    pub original_name: String,
    /// Generated file name inside the artifact directory
    pub filename: String,
    pub storage_path: PathBuf,
    pub size: u64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    /// Parent clip (present iff this clip is derived)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_clip_id: Option<ClipId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl Clip {
    /// Create a root clip for an uploaded file.
    pub fn upload(
        original_name: impl Into<String>,
        filename: impl Into<String>,
        storage_path: impl Into<PathBuf>,
        size: u64,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: ClipId::new(),
            original_name: original_name.into(),
            filename: filename.into(),
            storage_path: storage_path.into(),
            size,
            mime_type: mime_type.into(),
            uploaded_at: Utc::now(),
            source_clip_id: None,
            operation: None,
            processed_at: None,
        }
    }

    /// Create a clip derived from `source` by `operation`.
    pub fn derived(
        id: ClipId,
        source: &Clip,
        filename: impl Into<String>,
        storage_path: impl Into<PathBuf>,
        size: u64,
        mime_type: impl Into<String>,
        operation: Operation,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            original_name: source.original_name.clone(),
            filename: filename.into(),
            storage_path: storage_path.into(),
            size,
            mime_type: mime_type.into(),
            uploaded_at: now,
            source_clip_id: Some(source.id.clone()),
            operation: Some(operation),
            processed_at: Some(now),
        }
    }

    pub fn is_derived(&self) -> bool {
        self.source_clip_id.is_some()
    }
}

//! Project and clip repository.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use clipper_models::{Clip, ClipId, NewProject, Project, ProjectId, ProjectStatus};

use crate::error::{StorageError, StorageResult};

/// Narrow CRUD interface over projects and their clip forests.
///
/// Implementations must serialize appends within one project so the forest
/// invariant (every derived clip's source is already in the project) holds
/// under concurrent writers, without blocking writers on other projects.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// All projects, oldest first.
    async fn list_projects(&self) -> StorageResult<Vec<Project>>;

    /// Create an empty draft project.
    async fn create_project(&self, request: NewProject) -> StorageResult<Project>;

    async fn get_project(&self, project_id: &ProjectId) -> StorageResult<Project>;

    async fn get_clip(&self, project_id: &ProjectId, clip_id: &ClipId) -> StorageResult<Clip>;

    /// Append a clip to a project.
    ///
    /// Appending a clip whose ID is already present returns the stored clip
    /// unchanged, so redelivered jobs never register a second copy.
    async fn append_clip(&self, project_id: &ProjectId, clip: Clip) -> StorageResult<Clip>;

    /// Record that a transformation on the project started.
    async fn begin_processing(&self, project_id: &ProjectId) -> StorageResult<ProjectStatus>;

    /// Record that a transformation on the project settled.
    async fn finish_processing(&self, project_id: &ProjectId) -> StorageResult<ProjectStatus>;
}

#[derive(Debug)]
struct ProjectEntry {
    project: Project,
    in_flight: u32,
}

impl ProjectEntry {
    fn refresh_status(&mut self) -> ProjectStatus {
        self.project.status = if self.in_flight > 0 {
            ProjectStatus::Processing
        } else if self.project.has_derived_clips() {
            ProjectStatus::Complete
        } else {
            ProjectStatus::Draft
        };
        self.project.status
    }
}

/// In-process repository.
///
/// Each project sits behind its own mutex; the outer map lock is only held
/// long enough to find or insert an entry.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    projects: RwLock<HashMap<ProjectId, Arc<Mutex<ProjectEntry>>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, project_id: &ProjectId) -> StorageResult<Arc<Mutex<ProjectEntry>>> {
        self.projects
            .read()
            .await
            .get(project_id)
            .cloned()
            .ok_or_else(|| StorageError::ProjectNotFound(project_id.clone()))
    }
}

#[async_trait]
impl ProjectRepository for MemoryRepository {
    async fn list_projects(&self) -> StorageResult<Vec<Project>> {
        let entries: Vec<_> = self.projects.read().await.values().cloned().collect();

        let mut projects = Vec::with_capacity(entries.len());
        for entry in entries {
            projects.push(entry.lock().await.project.clone());
        }
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(projects)
    }

    async fn create_project(&self, request: NewProject) -> StorageResult<Project> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(StorageError::invalid_project("name must not be empty"));
        }

        let project = Project::new(NewProject {
            name: name.to_string(),
            description: request.description,
        });
        let entry = ProjectEntry {
            project: project.clone(),
            in_flight: 0,
        };
        self.projects
            .write()
            .await
            .insert(project.id.clone(), Arc::new(Mutex::new(entry)));

        info!(project_id = %project.id, name = %project.name, "Created project");
        Ok(project)
    }

    async fn get_project(&self, project_id: &ProjectId) -> StorageResult<Project> {
        let entry = self.entry(project_id).await?;
        let project = entry.lock().await.project.clone();
        Ok(project)
    }

    async fn get_clip(&self, project_id: &ProjectId, clip_id: &ClipId) -> StorageResult<Clip> {
        let entry = self.entry(project_id).await?;
        let guard = entry.lock().await;
        guard
            .project
            .clip(clip_id)
            .cloned()
            .ok_or_else(|| StorageError::ClipNotFound(clip_id.clone()))
    }

    async fn append_clip(&self, project_id: &ProjectId, clip: Clip) -> StorageResult<Clip> {
        let entry = self.entry(project_id).await?;
        let mut guard = entry.lock().await;

        if let Some(existing) = guard.project.clip(&clip.id) {
            debug!(project_id = %project_id, clip_id = %clip.id, "Clip already present");
            return Ok(existing.clone());
        }

        if let Some(source) = &clip.source_clip_id {
            if guard.project.clip(source).is_none() {
                return Err(StorageError::InvalidSource {
                    project: project_id.clone(),
                    source_clip: source.clone(),
                });
            }
        }

        guard.project.clips.push(clip.clone());
        guard.refresh_status();

        info!(
            project_id = %project_id,
            clip_id = %clip.id,
            derived = clip.is_derived(),
            "Appended clip"
        );
        Ok(clip)
    }

    async fn begin_processing(&self, project_id: &ProjectId) -> StorageResult<ProjectStatus> {
        let entry = self.entry(project_id).await?;
        let mut guard = entry.lock().await;
        guard.in_flight += 1;
        Ok(guard.refresh_status())
    }

    async fn finish_processing(&self, project_id: &ProjectId) -> StorageResult<ProjectStatus> {
        let entry = self.entry(project_id).await?;
        let mut guard = entry.lock().await;
        guard.in_flight = guard.in_flight.saturating_sub(1);
        Ok(guard.refresh_status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipper_models::Operation;

    fn new_project(name: &str) -> NewProject {
        NewProject {
            name: name.to_string(),
            description: String::new(),
        }
    }

    fn upload() -> Clip {
        Clip::upload("cat.mp4", "upload-1-cat.mp4", "/m/uploads/upload-1-cat.mp4", 10, "video/mp4")
    }

    fn derived_from(source: &Clip) -> Clip {
        Clip::derived(
            ClipId::new(),
            source,
            "processed-1-cat.mp4",
            "/m/processed/processed-1-cat.mp4",
            5,
            "video/mp4",
            Operation::Grayscale,
        )
    }

    #[tokio::test]
    async fn test_create_and_get_project() {
        let repo = MemoryRepository::new();
        let project = repo.create_project(new_project("Demo")).await.unwrap();

        let fetched = repo.get_project(&project.id).await.unwrap();
        assert_eq!(fetched.name, "Demo");
        assert_eq!(repo.list_projects().await.unwrap().len(), 1);

        assert!(matches!(
            repo.get_project(&ProjectId::new()).await,
            Err(StorageError::ProjectNotFound(_))
        ));
        assert!(matches!(
            repo.create_project(new_project("  ")).await,
            Err(StorageError::InvalidProject(_))
        ));
    }

    #[tokio::test]
    async fn test_append_enforces_forest() {
        let repo = MemoryRepository::new();
        let project = repo.create_project(new_project("Demo")).await.unwrap();
        let root = upload();

        // Source not yet in the project
        let orphan = derived_from(&root);
        assert!(matches!(
            repo.append_clip(&project.id, orphan).await,
            Err(StorageError::InvalidSource { .. })
        ));

        repo.append_clip(&project.id, root.clone()).await.unwrap();
        let child = derived_from(&root);
        repo.append_clip(&project.id, child.clone()).await.unwrap();

        let stored = repo.get_clip(&project.id, &child.id).await.unwrap();
        assert_eq!(stored.source_clip_id, Some(root.id));
        assert_eq!(repo.get_project(&project.id).await.unwrap().status, ProjectStatus::Complete);
    }

    #[tokio::test]
    async fn test_append_is_idempotent_by_id() {
        let repo = MemoryRepository::new();
        let project = repo.create_project(new_project("Demo")).await.unwrap();
        let root = upload();
        repo.append_clip(&project.id, root.clone()).await.unwrap();

        let id = ClipId::from_string("job-1");
        let first = Clip::derived(id.clone(), &root, "a.mp4", "/m/a.mp4", 1, "video/mp4", Operation::AudioMute);
        let second = Clip::derived(id, &root, "b.mp4", "/m/b.mp4", 2, "video/mp4", Operation::AudioMute);

        repo.append_clip(&project.id, first.clone()).await.unwrap();
        let returned = repo.append_clip(&project.id, second).await.unwrap();

        assert_eq!(returned, first);
        assert_eq!(repo.get_project(&project.id).await.unwrap().clips.len(), 2);
    }

    #[tokio::test]
    async fn test_processing_status() {
        let repo = MemoryRepository::new();
        let project = repo.create_project(new_project("Demo")).await.unwrap();

        assert_eq!(repo.begin_processing(&project.id).await.unwrap(), ProjectStatus::Processing);
        assert_eq!(repo.begin_processing(&project.id).await.unwrap(), ProjectStatus::Processing);
        assert_eq!(repo.finish_processing(&project.id).await.unwrap(), ProjectStatus::Processing);
        // Nothing derived yet
        assert_eq!(repo.finish_processing(&project.id).await.unwrap(), ProjectStatus::Draft);
        assert_eq!(repo.finish_processing(&project.id).await.unwrap(), ProjectStatus::Draft);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends() {
        let repo = Arc::new(MemoryRepository::new());
        let project = repo.create_project(new_project("Demo")).await.unwrap();
        let root = upload();
        repo.append_clip(&project.id, root.clone()).await.unwrap();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let repo = repo.clone();
                let project_id = project.id.clone();
                let clip = derived_from(&root);
                tokio::spawn(async move { repo.append_clip(&project_id, clip).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(repo.get_project(&project.id).await.unwrap().clips.len(), 51);
    }
}

//! Fixtures for pipeline and pool tests.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use clipper_media::MediaConfig;
use clipper_models::{Clip, NewProject, ProjectId};
use clipper_storage::{ArtifactStore, MemoryRepository, ProjectRepository};

use crate::pipeline::TransformPipeline;

/// Writes a fixed payload to the output path (always the last argument).
pub(crate) const COPY_ENGINE: &str = r#"for last; do :; done
printf 'processed' > "$last""#;

/// Leaves a partial output behind and exits non-zero.
pub(crate) const FAILING_ENGINE: &str = r#"for last; do :; done
printf 'half' > "$last"
echo 'Invalid data found when processing input' 1>&2
exit 1"#;

/// Never finishes on its own.
pub(crate) const SLOW_ENGINE: &str = "exec sleep 30";

/// A media root with one project holding one upload, and a pipeline whose
/// engine is a shell script that logs every run.
pub(crate) struct Fixture {
    pub dir: TempDir,
    pub repository: Arc<MemoryRepository>,
    pub pipeline: Arc<TransformPipeline>,
    pub project_id: ProjectId,
    pub upload: Clip,
}

impl Fixture {
    pub async fn new(engine_body: &str) -> Self {
        Self::with_timeout(engine_body, Duration::from_secs(10)).await
    }

    pub async fn with_timeout(engine_body: &str, timeout: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let artifacts = ArtifactStore::new(dir.path().join("media")).unwrap();
        artifacts.ensure_dirs().await.unwrap();

        let engine = dir.path().join("fake-ffmpeg");
        let runs = dir.path().join("runs.log");
        std::fs::write(
            &engine,
            format!("#!/bin/sh\necho run >> '{}'\n{}\n", runs.display(), engine_body),
        )
        .unwrap();
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();

        let repository = Arc::new(MemoryRepository::new());
        let project = repository
            .create_project(NewProject {
                name: "Demo".to_string(),
                description: String::new(),
            })
            .await
            .unwrap();

        let upload_path = artifacts.upload_path("upload-1_0_abcd1234-cat.mp4");
        std::fs::write(&upload_path, b"source video").unwrap();
        let upload = repository
            .append_clip(
                &project.id,
                Clip::upload("cat.mp4", "upload-1_0_abcd1234-cat.mp4", &upload_path, 12, "video/mp4"),
            )
            .await
            .unwrap();

        let media = MediaConfig {
            ffmpeg_path: engine.to_string_lossy().into_owned(),
            job_timeout: timeout,
            output_capture_limit: 4096,
        };
        let pipeline = Arc::new(TransformPipeline::new(repository.clone(), artifacts, media));

        Self {
            dir,
            repository,
            pipeline,
            project_id: project.id,
            upload,
        }
    }

    /// Files currently in the processed directory, staging files included.
    pub fn processed_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.pipeline.artifacts().processed_dir())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }
}

/// How many times the fake engine has been spawned.
pub(crate) fn count_runs(fx: &Fixture) -> usize {
    std::fs::read_to_string(fx.dir.path().join("runs.log"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

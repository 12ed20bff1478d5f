//! Transformation pipeline shared by direct requests and queued jobs.
//!
//! Both modes go through the same steps: resolve the source, name the
//! output, build the invocation, run the engine into a staging file, move
//! it into place and register the derived clip.

use scopeguard::ScopeGuard;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use clipper_media::{
    build_invocation, build_pipeline, is_non_empty_file, move_file, remove_if_exists,
    InvocationSpec, MediaConfig, MediaError, OutputNamer, TransformExecutor, PROCESSED_PREFIX,
};
use clipper_models::{
    Clip, ClipId, ClipTarget, Job, JobHandle, JobPayload, JobResult, JobTask, Operation,
    ProjectId, TransformOptions,
};
use clipper_queue::JobQueue;
use clipper_storage::{ArtifactStore, ProjectRepository};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Resolved request to derive one clip from another.
#[derive(Debug, Clone)]
pub struct ClipPlan {
    pub target: ClipTarget,
    pub source: Clip,
    pub operation: Operation,
    pub output_path: PathBuf,
}

/// A derived clip and its public URL.
#[derive(Debug, Clone)]
pub struct ProcessedClip {
    pub clip: Clip,
    pub url: Option<String>,
}

/// Command Builder, Transform Executor and Output Naming bound to one
/// repository and media root.
pub struct TransformPipeline {
    repository: Arc<dyn ProjectRepository>,
    artifacts: ArtifactStore,
    namer: OutputNamer,
    media: MediaConfig,
}

impl TransformPipeline {
    pub fn new(repository: Arc<dyn ProjectRepository>, artifacts: ArtifactStore, media: MediaConfig) -> Self {
        Self {
            repository,
            artifacts,
            namer: OutputNamer::new(),
            media,
        }
    }

    pub fn repository(&self) -> &Arc<dyn ProjectRepository> {
        &self.repository
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn namer(&self) -> &OutputNamer {
        &self.namer
    }

    pub fn media_config(&self) -> &MediaConfig {
        &self.media
    }

    /// Executor configured from the media settings.
    pub fn executor(&self) -> TransformExecutor {
        TransformExecutor::new().with_capture_limit(self.media.output_capture_limit)
    }

    /// Look up the source clip, pick an output name and validate the
    /// operation against it. Nothing is written.
    pub async fn plan_clip(
        &self,
        project_id: &ProjectId,
        clip_id: &ClipId,
        operation: Operation,
    ) -> WorkerResult<ClipPlan> {
        let source = self.repository.get_clip(project_id, clip_id).await?;

        let filename = self.namer.next_name(
            PROCESSED_PREFIX,
            &source.original_name,
            operation.output_extension(),
        );
        let output_path = self.artifacts.processed_path(&filename);

        build_invocation(&operation, &source.storage_path, &output_path)?;

        Ok(ClipPlan {
            target: ClipTarget {
                project_id: project_id.clone(),
                source_clip_id: clip_id.clone(),
            },
            source,
            operation,
            output_path,
        })
    }

    /// Apply `operation` synchronously and append the derived clip.
    pub async fn run_direct(
        &self,
        project_id: &ProjectId,
        clip_id: &ClipId,
        operation: Operation,
    ) -> WorkerResult<ProcessedClip> {
        let plan = self.plan_clip(project_id, clip_id, operation).await?;
        let name = plan.operation.name();

        self.repository.begin_processing(project_id).await?;
        // Fires only if this future is dropped mid-run.
        let guard = scopeguard::guard(
            (Arc::clone(&self.repository), project_id.clone(), staging_path(&plan.output_path)),
            |(repository, project_id, staging)| {
                warn!(project_id = %project_id, "Direct run dropped before completion");
                tokio::spawn(settle_processing(repository, project_id, Some(staging)));
            },
        );
        let outcome = self.run_plan(&plan).await;

        let (repository, project_id, _) = ScopeGuard::into_inner(guard);
        let settle = tokio::spawn(settle_processing(repository, project_id.clone(), None));
        if let Err(e) = settle.await {
            warn!(project_id = %project_id, "Project status update task failed: {}", e);
        }

        match &outcome {
            Ok(processed) => {
                metrics::record_direct_transform(name, "success");
                info!(
                    project_id = %project_id,
                    source_clip_id = %clip_id,
                    clip_id = %processed.clip.id,
                    operation = name,
                    "Clip processed"
                );
            }
            Err(e) => metrics::record_direct_transform(name, e.kind().as_str()),
        }
        outcome
    }

    async fn run_plan(&self, plan: &ClipPlan) -> WorkerResult<ProcessedClip> {
        let task = JobTask::Operation(plan.operation.clone());
        self.render(&self.executor(), &task, &plan.source.storage_path, &plan.output_path)
            .await?;

        let clip = self
            .register_derived(&plan.target, plan.operation.clone(), &plan.output_path, ClipId::new())
            .await?;
        let url = self.artifacts.url_for(&clip.storage_path);
        Ok(ProcessedClip { clip, url })
    }

    /// Validate `operation` and enqueue it. The project counts as processing
    /// until the job settles.
    pub async fn submit_clip_job(
        &self,
        queue: &dyn JobQueue,
        queue_name: &str,
        project_id: &ProjectId,
        clip_id: &ClipId,
        operation: Operation,
    ) -> WorkerResult<JobHandle> {
        let plan = self.plan_clip(project_id, clip_id, operation).await?;
        let payload = JobPayload {
            input_path: plan.source.storage_path.clone(),
            output_path: plan.output_path.clone(),
            task: JobTask::Operation(plan.operation),
            target: Some(plan.target),
        };

        self.repository.begin_processing(project_id).await?;
        match self.enqueue(queue, queue_name, payload).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                if let Err(status_err) = self.repository.finish_processing(project_id).await {
                    warn!(project_id = %project_id, "Failed to update project status: {}", status_err);
                }
                Err(e)
            }
        }
    }

    /// Validate a render request and enqueue it.
    ///
    /// Both paths must resolve inside the media root, and `output` must be a
    /// file that does not exist yet under `processed/`. Without `output` the
    /// result is named like any other derived artifact.
    pub async fn submit_render_job(
        &self,
        queue: &dyn JobQueue,
        queue_name: &str,
        input: &Path,
        output: Option<&Path>,
        options: TransformOptions,
    ) -> WorkerResult<JobHandle> {
        let input = self.artifacts.resolve_within(input)?;
        if !tokio::fs::try_exists(&input).await.unwrap_or(false) {
            return Err(MediaError::InputNotFound(input).into());
        }

        let output = match output {
            Some(path) => self.artifacts.resolve_within(path)?,
            None => {
                let source_name = input
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default();
                let filename = self.namer.next_name(
                    PROCESSED_PREFIX,
                    source_name,
                    options.output_extension(),
                );
                self.artifacts.processed_path(&filename)
            }
        };
        if output == input {
            return Err(WorkerError::invalid_job("output path must differ from input path"));
        }
        let processed_dir = self.artifacts.processed_dir();
        if !output.starts_with(&processed_dir) || output == processed_dir {
            return Err(WorkerError::invalid_job("output path must be inside processed/"));
        }
        // An existing output would be taken for a finished redelivery.
        if tokio::fs::try_exists(&output).await.unwrap_or(true) {
            return Err(WorkerError::invalid_job(format!(
                "output path {} already exists",
                output.display()
            )));
        }

        let task = JobTask::Options(options);
        self.invocation(&task, &input, &output)?;

        let payload = JobPayload {
            input_path: input,
            output_path: output,
            task,
            target: None,
        };
        self.enqueue(queue, queue_name, payload).await
    }

    async fn enqueue(&self, queue: &dyn JobQueue, queue_name: &str, payload: JobPayload) -> WorkerResult<JobHandle> {
        let task = payload.task.name();
        let handle = queue.enqueue(queue_name, payload).await?;
        metrics::record_job_enqueued(queue_name, task);
        debug!(job_id = %handle.id, queue = queue_name, task, "Submitted job");
        Ok(handle)
    }

    /// Execute one delivered job.
    ///
    /// Safe to repeat: when the output already exists and is non-empty the
    /// engine is not run again, and the derived clip ID comes from the job
    /// ID so the repository keeps a single copy.
    pub async fn execute_job(&self, job: &Job, executor: &TransformExecutor) -> WorkerResult<JobResult> {
        let payload = &job.payload;
        let input = self.artifacts.resolve_within(&payload.input_path)?;
        let output = self.artifacts.resolve_within(&payload.output_path)?;

        let skipped = is_non_empty_file(&output).await;
        if skipped {
            debug!(job_id = %job.id, output = %output.display(), "Output already present, skipping engine");
            // Still validate so a tampered payload cannot settle as success.
            self.invocation(&payload.task, &input, &output)?;
        } else {
            self.render(executor, &payload.task, &input, &output).await?;
        }

        let clip_id = match (&payload.target, &payload.task) {
            (Some(target), JobTask::Operation(operation)) => {
                let clip = self
                    .register_derived(target, operation.clone(), &output, ClipId::for_job(&job.id))
                    .await?;
                Some(clip.id)
            }
            (Some(_), JobTask::Options(_)) => {
                return Err(WorkerError::invalid_job("render jobs cannot target a clip"));
            }
            (None, _) => None,
        };

        Ok(JobResult {
            url: self.artifacts.url_for(&output),
            output_path: output,
            clip_id,
            skipped,
        })
    }

    /// Called once a job reaches a terminal state.
    pub async fn job_settled(&self, job: &Job) {
        if let Some(target) = &job.payload.target {
            if let Err(e) = self.repository.finish_processing(&target.project_id).await {
                warn!(job_id = %job.id, project_id = %target.project_id, "Failed to update project status: {}", e);
            }
        }
    }

    fn invocation(&self, task: &JobTask, input: &Path, output: &Path) -> WorkerResult<InvocationSpec> {
        let spec = match task {
            JobTask::Operation(operation) => build_invocation(operation, input, output)?,
            JobTask::Options(options) => build_pipeline(options, input, output)?,
        };
        Ok(spec.with_program(self.media.ffmpeg_path.as_str()))
    }

    /// Run the engine into a staging file next to `output`, then move it into
    /// place. `output` only ever appears complete.
    async fn render(&self, executor: &TransformExecutor, task: &JobTask, input: &Path, output: &Path) -> WorkerResult<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = staging_path(output);
        let spec = self.invocation(task, input, &staging)?;

        debug!(command = %spec.display(), "Rendering");
        executor.execute(&spec, self.media.job_timeout).await?;

        if let Err(e) = move_file(&staging, output).await {
            remove_if_exists(&staging).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn register_derived(
        &self,
        target: &ClipTarget,
        operation: Operation,
        output: &Path,
        clip_id: ClipId,
    ) -> WorkerResult<Clip> {
        let source = self
            .repository
            .get_clip(&target.project_id, &target.source_clip_id)
            .await?;
        let size = tokio::fs::metadata(output).await?.len();
        let filename = output
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| WorkerError::invalid_job("output path has no file name"))?
            .to_string();
        let mime_type = mime_for(output, &source);

        let clip = Clip::derived(clip_id, &source, filename, output, size, mime_type, operation);
        Ok(self.repository.append_clip(&target.project_id, clip).await?)
    }
}

/// Leave `processing` for one direct run, removing its staging file if given.
async fn settle_processing(repository: Arc<dyn ProjectRepository>, project_id: ProjectId, staging: Option<PathBuf>) {
    if let Some(staging) = staging {
        remove_if_exists(&staging).await;
    }
    if let Err(e) = repository.finish_processing(&project_id).await {
        warn!(project_id = %project_id, "Failed to update project status: {}", e);
    }
}

fn staging_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!(".tmp-{}", name))
}

fn mime_for(path: &Path, source: &Clip) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "ogv" => "video/ogg",
        "ts" => "video/mp2t",
        "flv" => "video/x-flv",
        _ => return source.mime_type.clone(),
    }
    .to_string()
}

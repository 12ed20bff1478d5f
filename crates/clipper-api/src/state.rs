//! Application state.

use std::sync::Arc;
use tracing::info;

use clipper_media::MediaConfig;
use clipper_queue::{JobMonitor, JobQueue, MemoryQueue, QueueBackend, QueueConfig, RedisQueue};
use clipper_storage::{ArtifactStore, MemoryRepository, ProjectRepository, StorageConfig};
use clipper_worker::{TransformPipeline, WorkerConfig, WorkerPool};

use crate::config::ApiConfig;

/// Shared application state.
///
/// Built in dependency order: storage, then the job queue, then the
/// pipeline and worker pool on top of both.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub repository: Arc<dyn ProjectRepository>,
    pub queue: Arc<dyn JobQueue>,
    pub monitor: JobMonitor,
    pub pipeline: Arc<TransformPipeline>,
    pub workers: Arc<WorkerPool>,
}

impl AppState {
    /// Create new application state from the environment.
    ///
    /// Workers are not started; call [`AppState::start_workers`].
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let storage_config = StorageConfig::from_env();
        let artifacts = ArtifactStore::new(&storage_config.media_root)?;
        artifacts.ensure_dirs().await?;
        let repository: Arc<dyn ProjectRepository> = Arc::new(MemoryRepository::new());
        info!(media_root = %artifacts.root().display(), "Storage ready");

        let queue_config = QueueConfig::from_env();
        let queue: Arc<dyn JobQueue> = match queue_config.backend {
            QueueBackend::Memory => Arc::new(MemoryQueue::from_config(&queue_config)),
            QueueBackend::Redis => {
                let redis = RedisQueue::new(queue_config.clone())?;
                redis.init().await?;
                Arc::new(redis)
            }
        };
        info!(backend = ?queue_config.backend, queues = ?queue_config.queues, "Job queue ready");

        Ok(Self::from_parts(
            config,
            repository,
            artifacts,
            queue,
            MediaConfig::from_env(),
            WorkerConfig::from_env(),
        ))
    }

    /// Assemble state from already-built backends.
    pub fn from_parts(
        config: ApiConfig,
        repository: Arc<dyn ProjectRepository>,
        artifacts: ArtifactStore,
        queue: Arc<dyn JobQueue>,
        media: MediaConfig,
        worker_config: WorkerConfig,
    ) -> Self {
        let pipeline = Arc::new(TransformPipeline::new(Arc::clone(&repository), artifacts, media));
        let workers = Arc::new(WorkerPool::new(
            worker_config,
            Arc::clone(&queue),
            Arc::clone(&pipeline),
        ));

        Self {
            config,
            repository,
            monitor: JobMonitor::new(Arc::clone(&queue)),
            queue,
            pipeline,
            workers,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        self.pipeline.artifacts()
    }

    pub fn start_workers(&self) {
        self.workers.start();
    }

    /// Stop workers, letting in-flight jobs finish within the grace period.
    pub async fn shutdown(&self) {
        self.workers.shutdown().await;
    }
}

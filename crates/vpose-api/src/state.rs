//! Application state.

use std::sync::Arc;

use vpose_storage::{LocalStorage, StorageResult};
use vpose_worker::{DetectorFactory, JobExecutor, JobRegistry, WorkerConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub storage: LocalStorage,
    pub registry: JobRegistry,
    pub executor: Arc<JobExecutor>,
}

impl AppState {
    /// Create storage and start the job executor.
    pub async fn new(
        config: ApiConfig,
        worker: WorkerConfig,
        detectors: Arc<dyn DetectorFactory>,
    ) -> StorageResult<Self> {
        let storage = LocalStorage::new(&config.data_dir, config.max_upload_bytes).await?;
        let registry = JobRegistry::new();
        let executor = JobExecutor::start(worker, registry.clone(), storage.clone(), detectors);

        Ok(Self {
            config,
            storage,
            registry,
            executor: Arc::new(executor),
        })
    }
}

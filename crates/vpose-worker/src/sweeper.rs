//! Periodic removal of old jobs and their files.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vpose_storage::LocalStorage;

use crate::config::WorkerConfig;
use crate::metrics;
use crate::registry::JobRegistry;

/// Removes finished jobs once they are older than the retention age.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    registry: JobRegistry,
    storage: LocalStorage,
    retention: Duration,
    /// Age after which files without a record (left over from a previous
    /// run) are removed
    orphan_age: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(registry: JobRegistry, storage: LocalStorage, retention: Duration, interval: Duration) -> Self {
        Self {
            registry,
            storage,
            retention,
            orphan_age: retention,
            interval,
        }
    }

    /// Build from worker config; `None` when retention is disabled.
    pub fn from_config(config: &WorkerConfig, registry: JobRegistry, storage: LocalStorage) -> Option<Self> {
        let retention = config.retention?;
        let mut sweeper = Self::new(registry, storage, retention, config.sweep_interval);
        sweeper.orphan_age = retention + config.job_timeout;
        Some(sweeper)
    }

    /// Run one sweep. Returns the number of job records removed.
    pub async fn sweep_once(&self) -> usize {
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|age| chrono::Utc::now().checked_sub_signed(age));
        let expired = match cutoff {
            Some(cutoff) => self.registry.take_finished_before(cutoff).await,
            None => Vec::new(),
        };
        for job in &expired {
            if let Err(e) = self.storage.remove_job_files(&job.id, &job.input_path).await {
                warn!(job_id = %job.id, "Failed to remove files of expired job: {}", e);
            }
        }

        let live = self.registry.ids().await;
        match self.storage.sweep_older_than(self.orphan_age, &live).await {
            Ok(0) => {}
            Ok(n) => debug!(files = n, "Removed orphaned files"),
            Err(e) => warn!("Orphan file sweep failed: {}", e),
        }

        if !expired.is_empty() {
            info!(jobs = expired.len(), "Removed expired jobs");
            metrics::record_jobs_swept(expired.len());
        }
        expired.len()
    }

    /// Sweep every `interval` until the returned handle is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        info!(
            retention_secs = self.retention.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Starting retention sweeper"
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.sweep_once().await;
            }
        })
    }
}

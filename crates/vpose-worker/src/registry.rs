//! In-memory job registry shared by the HTTP handlers and the executor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use vpose_models::{JobId, JobRecord, JobState};

/// Number of jobs in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StateCounts {
    /// Jobs that still occupy a queue slot or a worker.
    pub fn active(&self) -> usize {
        self.pending + self.processing
    }
}

/// Job records keyed by id. Cloning shares the same map.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: JobRecord) {
        self.jobs.write().await.insert(record.id.clone(), record);
    }

    pub async fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Apply `f` to a record in place, returning the updated copy.
    pub async fn update<F>(&self, id: &JobId, f: F) -> Option<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(id)?;
        f(record);
        Some(record.clone())
    }

    pub async fn remove(&self, id: &JobId) -> Option<JobRecord> {
        self.jobs.write().await.remove(id)
    }

    /// Newest jobs first.
    pub async fn list_recent(&self, limit: usize) -> Vec<JobRecord> {
        let jobs = self.jobs.read().await;
        let mut records: Vec<JobRecord> = jobs.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        records
    }

    pub async fn counts_by_state(&self) -> StateCounts {
        let jobs = self.jobs.read().await;
        jobs.values().fold(StateCounts::default(), |mut counts, job| {
            match job.state {
                JobState::Pending => counts.pending += 1,
                JobState::Processing => counts.processing += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
            counts
        })
    }

    /// Remove and return terminal jobs that finished before `cutoff`.
    pub async fn take_finished_before(&self, cutoff: DateTime<Utc>) -> Vec<JobRecord> {
        let mut jobs = self.jobs.write().await;
        let expired: Vec<JobId> = jobs
            .values()
            .filter(|job| job.state.is_terminal())
            .filter(|job| job.completed_at.unwrap_or(job.updated_at) < cutoff)
            .map(|job| job.id.clone())
            .collect();
        expired.iter().filter_map(|id| jobs.remove(id)).collect()
    }

    /// Ids of every job still held, whatever its state.
    pub async fn ids(&self) -> HashSet<JobId> {
        self.jobs.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

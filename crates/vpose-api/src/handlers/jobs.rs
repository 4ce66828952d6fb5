//! Job status handlers.
//!
//! Provides REST API endpoints for:
//! - Polling a single job (state, frame counters, result summary)
//! - Listing recent jobs
//! - Deleting a finished job and its files

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use vpose_models::{AnnotationReport, JobId, JobProgress, JobRecord, JobState, ProcessingOptions};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Upper bound for `GET /jobs?limit=`.
const MAX_LIST_LIMIT: usize = 100;

/// Public view of a job. Server-side paths are never exposed.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub filename: String,
    pub status: JobState,
    pub options: ProcessingOptions,
    pub progress: JobProgress,
    /// Percentage of the source decoded (only when the frame count is known)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<AnnotationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub view_url: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl From<&JobRecord> for JobView {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.id.to_string(),
            filename: job.original_filename.clone(),
            status: job.state,
            options: job.options,
            progress: job.progress,
            percent: job.progress.percent(),
            report: job.report.clone(),
            error_message: job.error_message.clone(),
            download_url: (job.state == JobState::Completed).then(|| format!("/download/{}", job.id)),
            view_url: format!("/jobs/{}/view", job.id),
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default = "default_list_limit")]
    pub limit: usize,
}

fn default_list_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobView>,
    /// Jobs pending or processing right now
    pub active: usize,
}

/// Look up a job by its path parameter. Malformed ids are reported as not found.
pub(crate) async fn find_job(state: &AppState, job_id: &str) -> ApiResult<JobRecord> {
    let id = JobId::parse(job_id).ok_or_else(|| ApiError::not_found("Job not found"))?;
    state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| ApiError::not_found("Job not found"))
}

/// Get the status of a job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let job = find_job(&state, &job_id).await?;
    Ok(Json(JobView::from(&job)))
}

/// List the most recent jobs, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Json<JobListResponse> {
    let limit = query.limit.clamp(1, MAX_LIST_LIMIT);
    let jobs = state.registry.list_recent(limit).await;
    let counts = state.registry.counts_by_state().await;

    Json(JobListResponse {
        jobs: jobs.iter().map(JobView::from).collect(),
        active: counts.active(),
    })
}

/// Delete a finished job together with its upload and output.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<StatusCode> {
    let job = find_job(&state, &job_id).await?;
    if !job.state.is_terminal() {
        return Err(ApiError::conflict("Job is still being processed"));
    }

    state.registry.remove(&job.id).await;
    if let Err(e) = state.storage.remove_job_files(&job.id, &job.input_path).await {
        warn!(job_id = %job.id, "Failed to remove job files: {}", e);
    }

    info!(job_id = %job.id, "Job deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_view_hides_paths() {
        let job = JobRecord::new(
            JobId::new(),
            "clip.mp4",
            "/srv/data/uploads/secret.mp4",
            "/srv/data/outputs/secret_pose.mp4",
            10,
            ProcessingOptions::default(),
        );
        let json = serde_json::to_string(&JobView::from(&job)).unwrap();
        assert!(!json.contains("/srv/data"));
        assert!(json.contains("\"status\":\"pending\""));
        assert!(!json.contains("download_url"));
    }

    #[test]
    fn test_completed_view_has_download_url() {
        let mut job = JobRecord::new(
            JobId::new(),
            "clip.mp4",
            "/tmp/in.mp4",
            "/tmp/out.mp4",
            10,
            ProcessingOptions::default(),
        );
        job.mark_completed(AnnotationReport::default());
        let view = JobView::from(&job);
        assert_eq!(view.download_url, Some(format!("/download/{}", job.id)));
    }
}

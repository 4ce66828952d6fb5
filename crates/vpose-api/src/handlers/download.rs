//! Annotated video download.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{self, Stream};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use vpose_models::JobState;
use vpose_storage::StorageError;

use crate::error::{ApiError, ApiResult};
use crate::handlers::jobs::find_job;
use crate::metrics;
use crate::state::AppState;

const CHUNK_SIZE: usize = 64 * 1024;

/// Stream the annotated video of a completed job as an attachment.
pub async fn download_output(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let job = find_job(&state, &job_id).await?;

    match job.state {
        JobState::Pending | JobState::Processing => {
            return Err(ApiError::conflict("Video is still being processed"));
        }
        JobState::Failed => {
            return Err(ApiError::gone(
                job.error_message
                    .unwrap_or_else(|| "Processing failed".to_string()),
            ));
        }
        JobState::Completed => {}
    }

    let (file, len) = match state.storage.open_output(&job.id).await {
        Ok(opened) => opened,
        Err(StorageError::NotFound(_)) => {
            warn!(job_id = %job.id, "Output of completed job is missing");
            return Err(ApiError::gone("Processed video is no longer available"));
        }
        Err(e) => return Err(e.into()),
    };

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        job.download_filename()
    ))
    .map_err(|e| ApiError::internal(format!("Invalid download file name: {}", e)))?;

    info!(job_id = %job.id, bytes = len, "Serving annotated video");
    metrics::record_download();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("video/mp4")),
            (header::CONTENT_LENGTH, HeaderValue::from(len)),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        Body::from_stream(file_chunks(file)),
    )
        .into_response())
}

fn file_chunks(file: File) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some((Bytes::from(buf), file)))
    })
}

//! Multipart video upload.

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};

use vpose_models::{JobId, JobRecord, ProcessingOptions};
use vpose_storage::{StorageError, StoredUpload};

use crate::error::{ApiError, ApiResult};
use crate::handlers::pages::accepted_page;
use crate::metrics;
use crate::state::AppState;

/// Multipart field carrying the video.
pub const VIDEO_FIELD: &str = "video";

/// Longest value accepted for a numeric option field.
const MAX_OPTION_FIELD_BYTES: usize = 32;

/// Response for API clients (`Accept: application/json`).
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: String,
    pub status: String,
    pub status_url: String,
    pub view_url: String,
    pub download_url: String,
}

impl UploadResponse {
    fn for_job(job: &JobRecord) -> Self {
        Self {
            job_id: job.id.to_string(),
            status: job.state.to_string(),
            status_url: format!("/jobs/{}", job.id),
            view_url: format!("/jobs/{}/view", job.id),
            download_url: format!("/download/{}", job.id),
        }
    }
}

#[derive(Default)]
struct UploadForm {
    video: Option<(String, StoredUpload)>,
    frame_stride: Option<String>,
    target_width: Option<String>,
}

/// Accept a video, store it and queue a pose overlay job.
pub async fn upload_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    if !state.executor.detector_available() {
        return Err(ApiError::unavailable("Pose model is not installed on the server"));
    }

    let job_id = JobId::new();
    let mut form = UploadForm::default();

    let parsed = match read_form(&state, &job_id, &mut multipart, &mut form).await {
        Ok(()) => build_options(state.executor.config().default_options, &form),
        Err(e) => Err(e),
    };
    let options = match parsed {
        Ok(options) => options,
        Err(e) => {
            if let Some((_, stored)) = &form.video {
                discard_upload(&state, stored).await;
            }
            return Err(e);
        }
    };

    let Some((original_filename, stored)) = form.video else {
        return Err(ApiError::bad_request("No video file uploaded"));
    };

    let record = JobRecord::new(
        job_id.clone(),
        original_filename,
        stored.path.clone(),
        state.storage.output_path(&job_id),
        stored.bytes,
        options,
    );
    state.registry.insert(record.clone()).await;

    if let Err(e) = state.executor.submit(job_id.clone()) {
        state.registry.remove(&job_id).await;
        discard_upload(&state, &stored).await;
        return Err(e.into());
    }

    info!(
        job_id = %job_id,
        filename = %record.original_filename,
        bytes = stored.bytes,
        frame_stride = options.frame_stride,
        target_width = options.target_width,
        "Video uploaded"
    );
    metrics::record_upload(stored.bytes);

    let response = if wants_json(&headers) {
        (StatusCode::ACCEPTED, Json(UploadResponse::for_job(&record))).into_response()
    } else {
        (StatusCode::ACCEPTED, accepted_page(&record)).into_response()
    };
    Ok(response)
}

/// Walk the multipart body, streaming the video to disk as it arrives.
async fn read_form(
    state: &AppState,
    job_id: &JobId,
    multipart: &mut Multipart,
    form: &mut UploadForm,
) -> ApiResult<()> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(state, e))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            VIDEO_FIELD => {
                if form.video.is_some() {
                    return Err(ApiError::bad_request("Only one video file can be uploaded at a time"));
                }
                let filename = field.file_name().unwrap_or_default().trim().to_string();
                if filename.is_empty() {
                    return Err(ApiError::bad_request("No file selected"));
                }
                let stored = state
                    .storage
                    .save_upload(job_id, &filename, Box::pin(field))
                    .await?;
                form.video = Some((filename, stored));
            }
            "frame_stride" => {
                form.frame_stride = Some(read_option_field(state, "frame_stride", field).await?);
            }
            "target_width" => {
                form.target_width = Some(read_option_field(state, "target_width", field).await?);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Read a short text field without buffering more than a few bytes of it.
async fn read_option_field(state: &AppState, name: &str, mut field: Field<'_>) -> ApiResult<String> {
    let mut value = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(state, e))? {
        if value.len() + chunk.len() > MAX_OPTION_FIELD_BYTES {
            return Err(invalid_number(name));
        }
        value.extend_from_slice(&chunk);
    }
    String::from_utf8(value).map_err(|_| invalid_number(name))
}

/// Apply the optional form overrides on top of the server defaults.
fn build_options(defaults: ProcessingOptions, form: &UploadForm) -> ApiResult<ProcessingOptions> {
    let mut options = defaults;
    if let Some(stride) = parse_number("frame_stride", form.frame_stride.as_deref())? {
        options = options.with_frame_stride(stride);
    }
    if let Some(width) = parse_number("target_width", form.target_width.as_deref())? {
        options = options.with_target_width(width);
    }
    options
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(options)
}

/// Empty values (a blank number input) mean "use the default".
fn parse_number(name: &str, value: Option<&str>) -> ApiResult<Option<u32>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| invalid_number(name)),
    }
}

fn invalid_number(name: &str) -> ApiError {
    ApiError::bad_request(format!("{} must be a positive integer", name))
}

fn multipart_error(state: &AppState, e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        StorageError::TooLarge {
            limit: state.config.max_upload_bytes,
        }
        .into()
    } else {
        ApiError::bad_request(format!("Malformed upload: {}", e.body_text()))
    }
}

async fn discard_upload(state: &AppState, stored: &StoredUpload) {
    if let Err(e) = state.storage.remove_file(&stored.path).await {
        warn!(path = %stored.path.display(), "Failed to remove rejected upload: {}", e);
    }
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("application/json"))
        .unwrap_or(false)
}

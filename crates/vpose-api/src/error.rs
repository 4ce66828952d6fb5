//! API error types.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use vpose_storage::StorageError;
use vpose_worker::WorkerError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn gone(msg: impl Into<String>) -> Self {
        Self::Gone(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) | ApiError::Storage(StorageError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::BadRequest(_)
            | ApiError::Storage(StorageError::InvalidName(_))
            | ApiError::Storage(StorageError::Empty)
            | ApiError::Storage(StorageError::Stream(_)) => StatusCode::BAD_REQUEST,
            ApiError::Storage(StorageError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Worker(e) if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) | ApiError::Storage(_) | ApiError::Worker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message shown to the client.
    fn detail(&self) -> String {
        match self {
            ApiError::Storage(e) if e.is_client_error() => e.to_string(),
            ApiError::Storage(StorageError::Stream(_)) => "Upload was interrupted".to_string(),
            ApiError::Worker(WorkerError::QueueFull(_)) => {
                "Too many videos are waiting to be processed, try again later".to_string()
            }
            ApiError::Worker(WorkerError::ShuttingDown) => "Server is shutting down".to_string(),
            _ => self.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    /// Same message under the key form clients read on 400s
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ErrorResponse {
    fn new(status: StatusCode, detail: String) -> Self {
        let error = (status == StatusCode::BAD_REQUEST).then(|| detail.clone());
        Self { detail, error }
    }
}

/// Marks a response whose message may leak internals.
#[derive(Debug, Clone, Copy)]
struct InternalFailure;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "Request failed: {}", self);
        }

        let mut response = (status, Json(ErrorResponse::new(status, self.detail()))).into_response();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            response.extensions_mut().insert(InternalFailure);
        }
        if matches!(self, ApiError::RateLimited) {
            response
                .headers_mut()
                .insert("Retry-After", axum::http::HeaderValue::from_static("1"));
        }
        response
    }
}

/// Don't expose internal error details in production.
pub async fn mask_internal_errors(
    State(production): State<bool>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if production && response.extensions().get::<InternalFailure>().is_some() {
        let status = response.status();
        let body = ErrorResponse::new(status, "An internal error occurred".to_string());
        return (status, Json(body)).into_response();
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::bad_request("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(StorageError::TooLarge { limit: 1 }).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::from(StorageError::not_found("x")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(WorkerError::QueueFull(8)).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(WorkerError::processing_failed("x")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_bad_request_detail_is_the_message() {
        assert_eq!(ApiError::bad_request("No file selected").detail(), "No file selected");
    }

    #[test]
    fn test_error_key_only_on_bad_request() {
        let body = serde_json::to_value(ErrorResponse::new(StatusCode::BAD_REQUEST, "No file selected".into())).unwrap();
        assert_eq!(body["error"], "No file selected");
        assert_eq!(body["detail"], "No file selected");

        let body = serde_json::to_value(ErrorResponse::new(StatusCode::NOT_FOUND, "Not found: x".into())).unwrap();
        assert!(body.get("error").is_none());
    }

    async fn masked_body(production: bool, make_error: fn() -> ApiError) -> (StatusCode, serde_json::Value) {
        use axum::body::Body;
        use axum::routing::get;
        use axum::Router;
        use tower::ServiceExt;

        let app = Router::new()
            .route("/", get(move || async move { Err::<(), _>(make_error()) }))
            .layer(axum::middleware::from_fn_with_state(production, mask_internal_errors));
        let response = app
            .oneshot(axum::http::Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_production_masks_internal_errors() {
        let (status, body) = masked_body(true, || ApiError::internal("disk on fire")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "An internal error occurred");

        let (_, body) = masked_body(false, || ApiError::internal("disk on fire")).await;
        assert_eq!(body["detail"], "Internal error: disk on fire");
    }

    #[tokio::test]
    async fn test_production_keeps_client_and_unavailable_messages() {
        let (status, body) = masked_body(true, || ApiError::unavailable("Pose model missing")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["detail"], "Service unavailable: Pose model missing");

        let (_, body) = masked_body(true, || ApiError::bad_request("No file selected")).await;
        assert_eq!(body["error"], "No file selected");
    }
}

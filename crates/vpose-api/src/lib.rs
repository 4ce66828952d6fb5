//! Axum HTTP server for the pose overlay service.
//!
//! This crate provides:
//! - The upload page and multipart upload endpoint
//! - Job status (JSON and HTML) and annotated video download
//! - Per-IP rate limiting on uploads and security headers
//! - Health, readiness and Prometheus metrics endpoints

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;

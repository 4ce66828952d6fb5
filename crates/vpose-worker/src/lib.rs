//! Pose overlay job execution.
//!
//! This crate provides:
//! - An in-memory job registry shared with the HTTP layer
//! - A bounded job executor running the blocking annotate pipeline
//! - Retention sweeping of old jobs and their files
//! - Structured job logging and job metrics

pub mod config;
pub mod detector;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod sweeper;

pub use config::WorkerConfig;
pub use detector::{DetectorFactory, MoveNetFactory};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use registry::{JobRegistry, StateCounts};
pub use sweeper::RetentionSweeper;

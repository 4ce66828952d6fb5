//! Shared data models for the pose overlay service.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their lifecycle
//! - Processing options (frame stride, target width, score threshold)
//! - Pose keypoints and the COCO skeleton topology
//! - Annotation reports produced by the media pipeline

pub mod job;
pub mod options;
pub mod pose;
pub mod report;

// Re-export common types
pub use job::{JobId, JobProgress, JobRecord, JobState};
pub use options::{OptionsError, ProcessingOptions};
pub use pose::{Keypoint, KeypointKind, Limb, Pose, SKELETON};
pub use report::AnnotationReport;

//! Job metrics recorded through the `metrics` facade.
//!
//! Nothing is exported unless the binary installs a recorder.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "vpose_jobs_submitted_total";
    pub const JOBS_REJECTED_TOTAL: &str = "vpose_jobs_rejected_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vpose_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vpose_jobs_failed_total";
    pub const JOBS_IN_PROGRESS: &str = "vpose_jobs_in_progress";
    pub const JOB_DURATION_SECONDS: &str = "vpose_job_duration_seconds";
    pub const FRAMES_PROCESSED_TOTAL: &str = "vpose_frames_processed_total";
    pub const FRAMES_WITH_POSE_TOTAL: &str = "vpose_frames_with_pose_total";
    pub const TRANSCODE_DURATION_SECONDS: &str = "vpose_transcode_duration_seconds";
    pub const JOBS_SWEPT_TOTAL: &str = "vpose_jobs_swept_total";
}

pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_job_rejected(reason: &'static str) {
    counter!(names::JOBS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_job_completed(duration_secs: f64, frames_written: u64, frames_with_pose: u64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "completed").record(duration_secs);
    counter!(names::FRAMES_PROCESSED_TOTAL).increment(frames_written);
    counter!(names::FRAMES_WITH_POSE_TOTAL).increment(frames_with_pose);
}

pub fn record_job_failed(duration_secs: f64, reason: &'static str) {
    counter!(names::JOBS_FAILED_TOTAL, "reason" => reason).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "failed").record(duration_secs);
}

pub fn job_started() {
    gauge!(names::JOBS_IN_PROGRESS).increment(1.0);
}

pub fn job_finished() {
    gauge!(names::JOBS_IN_PROGRESS).decrement(1.0);
}

pub fn record_transcode_duration(duration_secs: f64) {
    histogram!(names::TRANSCODE_DURATION_SECONDS).record(duration_secs);
}

pub fn record_jobs_swept(count: usize) {
    counter!(names::JOBS_SWEPT_TOTAL).increment(count as u64);
}

//! Job models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::{AnnotationReport, ProcessingOptions};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a user-supplied id. Only canonical UUIDs are accepted, so the
    /// id is always safe to embed in a file name.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s)
            .ok()
            .filter(|u| u.hyphenated().to_string() == s.to_ascii_lowercase())
            .map(|u| Self(u.hyphenated().to_string()))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is waiting for a worker slot
    #[default]
    Pending,
    /// Frames are being annotated
    Processing,
    /// Output video is ready for download
    Completed,
    /// Job failed; see `error_message`
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live frame counters for a running job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobProgress {
    pub frames_read: u64,
    pub frames_written: u64,
    pub frames_with_pose: u64,
    /// Source frame count reported by the container (may be 0 if unknown)
    pub frames_total: u64,
}

impl JobProgress {
    /// Percentage of the source decoded, if the total is known.
    pub fn percent(&self) -> Option<u8> {
        if self.frames_total == 0 {
            return None;
        }
        let pct = (self.frames_read.saturating_mul(100) / self.frames_total).min(100);
        Some(pct as u8)
    }
}

/// A pose overlay job and everything known about it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    /// Unique job ID
    pub id: JobId,

    /// File name as sent by the client (display only)
    pub original_filename: String,

    /// Where the upload was stored
    #[schemars(with = "String")]
    pub input_path: PathBuf,

    /// Where the annotated video is written
    #[schemars(with = "String")]
    pub output_path: PathBuf,

    /// Upload size in bytes
    pub input_bytes: u64,

    #[serde(default)]
    pub state: JobState,

    pub options: ProcessingOptions,

    #[serde(default)]
    pub progress: JobProgress,

    /// Final report once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<AnnotationReport>,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a pending job.
    pub fn new(
        id: JobId,
        original_filename: impl Into<String>,
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        input_bytes: u64,
        options: ProcessingOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            original_filename: original_filename.into(),
            input_path: input_path.into(),
            output_path: output_path.into(),
            input_bytes,
            state: JobState::Pending,
            options,
            progress: JobProgress::default(),
            report: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn mark_processing(&mut self) {
        let now = Utc::now();
        self.state = JobState::Processing;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    pub fn update_progress(&mut self, progress: JobProgress) {
        self.progress = progress;
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self, report: AnnotationReport) {
        let now = Utc::now();
        self.progress.frames_read = report.frames_read;
        self.progress.frames_written = report.frames_written;
        self.progress.frames_with_pose = report.frames_with_pose;
        self.report = Some(report);
        self.state = JobState::Completed;
        self.error_message = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        let now = Utc::now();
        self.state = JobState::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Download file name derived from the original upload name.
    pub fn download_filename(&self) -> String {
        let stem = std::path::Path::new(&self.original_filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| {
                s.chars()
                    .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                    .collect::<String>()
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "video".to_string());
        format!("{}_pose.mp4", stem)
    }
}

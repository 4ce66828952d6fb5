//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job queue is full ({0} waiting)")]
    QueueFull(usize),

    #[error("Worker is shutting down")]
    ShuttingDown,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] vpose_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] vpose_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }

    /// Whether the executor cannot accept work right now.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, WorkerError::QueueFull(_) | WorkerError::ShuttingDown)
    }

    /// Message stored on a failed job and shown to the uploader.
    pub fn user_message(&self) -> String {
        match self {
            WorkerError::Media(e) if e.is_bad_input() => {
                "The uploaded file could not be read as a video".to_string()
            }
            WorkerError::Media(vpose_media::MediaError::ModelNotFound(_)) => {
                "Pose model is not installed on the server".to_string()
            }
            WorkerError::Media(vpose_media::MediaError::Cancelled) | WorkerError::ShuttingDown => {
                "Processing was interrupted by a server shutdown".to_string()
            }
            WorkerError::Timeout(secs) => format!("Processing took longer than {} seconds", secs),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpose_media::MediaError;

    #[test]
    fn test_user_message_hides_decoder_details() {
        let err = WorkerError::from(MediaError::invalid_video("moov atom not found"));
        assert_eq!(err.user_message(), "The uploaded file could not be read as a video");
    }

    #[test]
    fn test_unavailable() {
        assert!(WorkerError::QueueFull(4).is_unavailable());
        assert!(WorkerError::ShuttingDown.is_unavailable());
        assert!(!WorkerError::Timeout(1).is_unavailable());
    }
}

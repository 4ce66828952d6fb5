//! Summary of a finished annotate run.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Result of running the annotate pipeline over one video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnnotationReport {
    /// Frames decoded from the source (including skipped ones)
    pub frames_read: u64,
    /// Frames written to the output
    pub frames_written: u64,
    /// Written frames where a pose was drawn
    pub frames_with_pose: u64,
    pub source_width: u32,
    pub source_height: u32,
    pub source_fps: f64,
    pub output_width: u32,
    pub output_height: u32,
    pub output_fps: f64,
    /// Wall-clock time spent in the pipeline
    pub elapsed_secs: f64,
}

impl AnnotationReport {
    /// Fraction of written frames with a detected pose.
    pub fn detection_rate(&self) -> f64 {
        if self.frames_written == 0 {
            0.0
        } else {
            self.frames_with_pose as f64 / self.frames_written as f64
        }
    }
}

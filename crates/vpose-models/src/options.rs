//! Processing options for a pose overlay job.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default frame stride: process every 5th frame.
pub const DEFAULT_FRAME_STRIDE: u32 = 5;

/// Default output width in pixels.
pub const DEFAULT_TARGET_WIDTH: u32 = 640;

/// Default minimum keypoint confidence for drawing.
pub const DEFAULT_MIN_KEYPOINT_SCORE: f32 = 0.3;

/// Smallest accepted target width.
pub const MIN_TARGET_WIDTH: u32 = 32;

/// Largest accepted target width.
pub const MAX_TARGET_WIDTH: u32 = 3840;

/// Largest accepted frame stride.
pub const MAX_FRAME_STRIDE: u32 = 120;

/// Invalid processing options.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptionsError {
    #[error("frame_stride must be between 1 and {MAX_FRAME_STRIDE}, got {0}")]
    FrameStride(u32),

    #[error("target_width must be between {MIN_TARGET_WIDTH} and {MAX_TARGET_WIDTH}, got {0}")]
    TargetWidth(u32),

    #[error("min_keypoint_score must be within [0, 1], got {0}")]
    KeypointScore(f32),
}

/// Tuning knobs for the annotate pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingOptions {
    /// Process one frame out of every `frame_stride` decoded frames
    #[serde(default = "default_frame_stride")]
    pub frame_stride: u32,

    /// Width processed frames are downscaled to (never upscaled)
    #[serde(default = "default_target_width")]
    pub target_width: u32,

    /// Keypoints below this confidence are not drawn
    #[serde(default = "default_min_keypoint_score")]
    pub min_keypoint_score: f32,
}

fn default_frame_stride() -> u32 {
    DEFAULT_FRAME_STRIDE
}

fn default_target_width() -> u32 {
    DEFAULT_TARGET_WIDTH
}

fn default_min_keypoint_score() -> f32 {
    DEFAULT_MIN_KEYPOINT_SCORE
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            frame_stride: DEFAULT_FRAME_STRIDE,
            target_width: DEFAULT_TARGET_WIDTH,
            min_keypoint_score: DEFAULT_MIN_KEYPOINT_SCORE,
        }
    }
}

impl ProcessingOptions {
    /// Override the frame stride.
    pub fn with_frame_stride(mut self, stride: u32) -> Self {
        self.frame_stride = stride;
        self
    }

    /// Override the target width.
    pub fn with_target_width(mut self, width: u32) -> Self {
        self.target_width = width;
        self
    }

    /// Override the keypoint score threshold.
    pub fn with_min_keypoint_score(mut self, score: f32) -> Self {
        self.min_keypoint_score = score;
        self
    }

    /// Check that all values are within their accepted ranges.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.frame_stride == 0 || self.frame_stride > MAX_FRAME_STRIDE {
            return Err(OptionsError::FrameStride(self.frame_stride));
        }
        if !(MIN_TARGET_WIDTH..=MAX_TARGET_WIDTH).contains(&self.target_width) {
            return Err(OptionsError::TargetWidth(self.target_width));
        }
        if !(0.0..=1.0).contains(&self.min_keypoint_score) || self.min_keypoint_score.is_nan() {
            return Err(OptionsError::KeypointScore(self.min_keypoint_score));
        }
        Ok(())
    }
}

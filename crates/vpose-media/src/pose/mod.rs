//! Pose detection.
//!
//! [`PoseDetector`] is the seam between the annotate pipeline and the model.
//! The production implementation is [`MoveNetDetector`], an ONNX Runtime
//! session over a single-person MoveNet export.

mod movenet;

use std::path::{Path, PathBuf};

use opencv::core::Mat;
use vpose_models::Pose;

use crate::error::MediaResult;

pub use movenet::{InputElement, MoveNetConfig, MoveNetDetector};

/// Detects at most one person per frame.
pub trait PoseDetector: Send {
    /// Run the model on a BGR frame. Keypoints are returned in the pixel
    /// space of `frame_bgr`; `None` means nobody was found.
    fn detect(&mut self, frame_bgr: &Mat) -> MediaResult<Option<Pose>>;

    /// Short label used in logs and metrics.
    fn name(&self) -> &str;
}

impl<T: PoseDetector + ?Sized> PoseDetector for Box<T> {
    fn detect(&mut self, frame_bgr: &Mat) -> MediaResult<Option<Pose>> {
        (**self).detect(frame_bgr)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Env var naming an explicit model file.
pub const MODEL_PATH_ENV: &str = "POSE_MODEL_PATH";

/// Model paths in preference order.
const MODEL_CANDIDATES: &[&str] = &[
    "./models/movenet_singlepose_lightning.onnx",
    "./models/movenet_singlepose_thunder.onnx",
    "/app/models/movenet_singlepose_lightning.onnx",
    "/app/models/movenet_singlepose_thunder.onnx",
    "/usr/share/vpose/models/movenet_singlepose_lightning.onnx",
];

/// Locate the pose model: `POSE_MODEL_PATH` first, then the default paths.
pub fn find_model_path() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(MODEL_PATH_ENV) {
        let path = PathBuf::from(explicit);
        return path.exists().then_some(path);
    }
    MODEL_CANDIDATES
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}

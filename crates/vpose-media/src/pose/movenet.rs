//! MoveNet single-pose inference with ONNX Runtime.
//!
//! Model contract (TF Hub export converted with tf2onnx):
//! - input: NHWC `[1, S, S, 3]` RGB, S = 192 (lightning) or 256 (thunder),
//!   int32 for the stock export, float32 for some community exports
//! - output: `[1, 1, 17, 3]` rows of `(y, x, score)` normalized to the input
//!
//! Frames are letterboxed to a square before inference so keypoints map back
//! without aspect distortion.

use std::path::{Path, PathBuf};

use opencv::core::Mat;
use opencv::imgproc;
use opencv::prelude::*;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};
use vpose_models::{Keypoint, KeypointKind, Pose};

use super::{find_model_path, PoseDetector};
use crate::error::{MediaError, MediaResult};
use crate::letterbox::{letterbox, LetterboxMapping};

/// Values per keypoint in the model output.
const VALUES_PER_KEYPOINT: usize = 3;

/// Element type of the model input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputElement {
    /// Raw 0..255 pixel values as int32
    #[default]
    Int32,
    /// Raw 0..255 pixel values as float32
    Float32,
}

impl InputElement {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int32" | "i32" => Some(Self::Int32),
            "float32" | "f32" | "float" => Some(Self::Float32),
            _ => None,
        }
    }
}

/// MoveNet detector configuration.
#[derive(Debug, Clone)]
pub struct MoveNetConfig {
    pub model_path: PathBuf,
    /// Square input side length
    pub input_size: i32,
    pub input_element: InputElement,
    /// Poses whose mean keypoint score is below this are discarded
    pub min_pose_score: f32,
    /// ONNX Runtime intra-op threads (0 = runtime default)
    pub intra_threads: usize,
}

impl MoveNetConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        let model_path = model_path.into();
        let input_size = default_input_size(&model_path);
        Self {
            model_path,
            input_size,
            input_element: InputElement::default(),
            min_pose_score: 0.2,
            intra_threads: 0,
        }
    }

    /// Build from the environment, locating the model file.
    ///
    /// - `POSE_MODEL_PATH`: explicit model file
    /// - `POSE_MODEL_INPUT_SIZE`: input side (default 192, 256 for thunder)
    /// - `POSE_MODEL_INPUT_TYPE`: `int32` (default) or `float32`
    /// - `POSE_MIN_SCORE`: minimum mean keypoint score (default 0.2)
    /// - `POSE_INTRA_THREADS`: ONNX Runtime intra-op threads
    pub fn from_env() -> MediaResult<Self> {
        let model_path = find_model_path().ok_or_else(|| {
            MediaError::model_not_found(
                "MoveNet ONNX model not found; set POSE_MODEL_PATH or place it under ./models/",
            )
        })?;
        let mut config = Self::new(model_path);

        if let Some(size) = std::env::var("POSE_MODEL_INPUT_SIZE")
            .ok()
            .and_then(|s| s.parse::<i32>().ok())
            .filter(|s| *s >= 32)
        {
            config.input_size = size;
        }
        if let Some(element) = std::env::var("POSE_MODEL_INPUT_TYPE")
            .ok()
            .and_then(|s| InputElement::parse(&s))
        {
            config.input_element = element;
        }
        if let Some(score) = std::env::var("POSE_MIN_SCORE")
            .ok()
            .and_then(|s| s.parse::<f32>().ok())
            .filter(|s| (0.0..=1.0).contains(s))
        {
            config.min_pose_score = score;
        }
        config.intra_threads = std::env::var("POSE_INTRA_THREADS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        Ok(config)
    }
}

fn default_input_size(path: &Path) -> i32 {
    let name = path.to_string_lossy().to_ascii_lowercase();
    if name.contains("thunder") {
        256
    } else {
        192
    }
}

/// ONNX Runtime wrapper for MoveNet single-pose.
pub struct MoveNetDetector {
    session: Session,
    config: MoveNetConfig,
}

impl MoveNetDetector {
    pub fn load(config: MoveNetConfig) -> MediaResult<Self> {
        if !config.model_path.exists() {
            return Err(MediaError::model_not_found(config.model_path.display().to_string()));
        }

        let session = create_session(&config.model_path, config.intra_threads)?;

        info!(
            model = %config.model_path.display(),
            input_size = config.input_size,
            input_element = ?config.input_element,
            "Loaded MoveNet pose model"
        );

        Ok(Self { session, config })
    }

    pub fn config(&self) -> &MoveNetConfig {
        &self.config
    }

    fn build_input(&self, canvas_bgr: &Mat) -> MediaResult<Value> {
        let mut rgb = Mat::default();
        imgproc::cvt_color_def(canvas_bgr, &mut rgb, imgproc::COLOR_BGR2RGB)
            .map_err(|e| MediaError::detection_failed(format!("BGR2RGB failed: {e}")))?;

        let data = rgb
            .data_bytes()
            .map_err(|e| MediaError::detection_failed(format!("Mat data: {e}")))?;

        let side = self.config.input_size as usize;
        if data.len() != side * side * 3 {
            return Err(MediaError::detection_failed(format!(
                "Unexpected canvas size: {} bytes for {}x{}",
                data.len(),
                side,
                side
            )));
        }

        let shape = vec![1usize, side, side, 3];
        let value = match self.config.input_element {
            InputElement::Int32 => {
                let buf: Vec<i32> = data.iter().map(|&v| i32::from(v)).collect();
                Tensor::from_array((shape, buf.into_boxed_slice())).map(Value::from)
            }
            InputElement::Float32 => {
                let buf: Vec<f32> = data.iter().map(|&v| f32::from(v)).collect();
                Tensor::from_array((shape, buf.into_boxed_slice())).map(Value::from)
            }
        };
        value.map_err(|e| MediaError::detection_failed(format!("ORT tensor: {e}")))
    }
}

impl PoseDetector for MoveNetDetector {
    fn detect(&mut self, frame_bgr: &Mat) -> MediaResult<Option<Pose>> {
        let (canvas, mapping) = letterbox(frame_bgr, self.config.input_size)?;
        let input = self.build_input(&canvas)?;

        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| MediaError::detection_failed(format!("ORT run failed: {e}")))?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::detection_failed(format!("ORT extract: {e}")))?;

        let pose = decode_keypoints(data, &mapping)?;
        let score = pose.mean_score();
        if score < self.config.min_pose_score {
            debug!(score, "Pose below confidence threshold");
            return Ok(None);
        }
        Ok(Some(pose))
    }

    fn name(&self) -> &str {
        "movenet"
    }
}

/// Decode `(y, x, score)` rows into a pose in frame coordinates.
pub(crate) fn decode_keypoints(data: &[f32], mapping: &LetterboxMapping) -> MediaResult<Pose> {
    let needed = KeypointKind::COUNT * VALUES_PER_KEYPOINT;
    if data.len() < needed {
        return Err(MediaError::detection_failed(format!(
            "Pose output too small: expected {} values, got {}",
            needed,
            data.len()
        )));
    }

    let mut keypoints = [Keypoint::new(0.0, 0.0, 0.0); KeypointKind::COUNT];
    for (i, kp) in keypoints.iter_mut().enumerate() {
        let base = i * VALUES_PER_KEYPOINT;
        let (ny, nx, score) = (data[base], data[base + 1], data[base + 2]);
        let (x, y) = mapping.to_frame(nx, ny);
        *kp = Keypoint::new(x, y, score.clamp(0.0, 1.0));
    }
    Ok(Pose::new(keypoints))
}

/// Create ONNX Runtime session, preferring CUDA when built with it.
fn create_session(model_path: &Path, intra_threads: usize) -> MediaResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| MediaError::detection_failed(format!("ORT read model file: {e}")))?;

    let mut builder = Session::builder()
        .map_err(|e| MediaError::detection_failed(format!("ORT session builder: {e}")))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::detection_failed(format!("ORT opt level: {e}")))?;

    if intra_threads > 0 {
        builder = builder
            .with_intra_threads(intra_threads)
            .map_err(|e| MediaError::detection_failed(format!("ORT intra threads: {e}")))?;
    }

    #[cfg(feature = "cuda")]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for pose detection");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, using CPU");
    }

    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::detection_failed(format!("ORT load model: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_element_parse() {
        assert_eq!(InputElement::parse("INT32"), Some(InputElement::Int32));
        assert_eq!(InputElement::parse(" float32 "), Some(InputElement::Float32));
        assert_eq!(InputElement::parse("uint8"), None);
    }

    #[test]
    fn test_default_input_size_from_name() {
        assert_eq!(MoveNetConfig::new("m/movenet_singlepose_thunder.onnx").input_size, 256);
        assert_eq!(MoveNetConfig::new("m/movenet_singlepose_lightning.onnx").input_size, 192);
    }

    #[test]
    fn test_decode_keypoints_maps_through_letterbox() {
        let mapping = LetterboxMapping::new(640, 360, 192);
        let mut data = vec![0.0f32; 51];
        // Nose at the canvas center with high confidence.
        data[0] = 0.5;
        data[1] = 0.5;
        data[2] = 0.9;

        let pose = decode_keypoints(&data, &mapping).unwrap();
        let nose = pose.get(KeypointKind::Nose);
        assert!((nose.x - 320.0).abs() < 0.5);
        assert!((nose.y - 180.0).abs() < 0.5);
        assert!((nose.score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_keypoints_rejects_short_output() {
        let mapping = LetterboxMapping::new(640, 360, 192);
        assert!(decode_keypoints(&[0.0; 10], &mapping).is_err());
    }

    #[test]
    fn test_load_missing_model() {
        let err = MoveNetDetector::load(MoveNetConfig::new("/nope/movenet.onnx"))
            .err()
            .unwrap();
        assert!(matches!(err, MediaError::ModelNotFound(_)));
    }
}

//! Video processing for the pose overlay service.
//!
//! This crate provides:
//! - Frame sampling and downscaling rules
//! - An ONNX Runtime pose detector (MoveNet single-pose)
//! - Skeleton overlay drawing with OpenCV
//! - The blocking annotate pipeline (decode → detect → draw → encode)
//! - An optional FFmpeg pass that makes the output browser-playable

pub mod command;
pub mod error;
pub mod letterbox;
pub mod overlay;
pub mod pipeline;
pub mod pose;
pub mod probe;
pub mod sampling;

pub use command::{check_ffmpeg, transcode_for_web, web_transcode_command, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use overlay::{draw_pose, OverlayStyle};
pub use pipeline::{annotate_video, CancelFlag};
pub use pose::{find_model_path, InputElement, MoveNetConfig, MoveNetDetector, PoseDetector};
pub use probe::{probe_video, VideoInfo};
pub use sampling::{output_fps, target_size, FrameSampler};

//! Container properties read through OpenCV.

use std::path::Path;

use opencv::prelude::*;
use opencv::videoio::{
    VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_FRAME_HEIGHT,
    CAP_PROP_FRAME_WIDTH,
};
use serde::{Deserialize, Serialize};

use crate::error::{MediaError, MediaResult};

/// Video file information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (0 when unknown)
    pub fps: f64,
    /// Frame count as reported by the container (0 when unknown)
    pub frame_count: u64,
    /// Duration in seconds (0 when fps or frame count is unknown)
    pub duration: f64,
}

/// Open `path` for decoding, failing if OpenCV cannot read it.
pub(crate) fn open_capture(path: &Path) -> MediaResult<VideoCapture> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    let path_str = path
        .to_str()
        .ok_or_else(|| MediaError::invalid_video("Path is not valid UTF-8"))?;

    let cap = VideoCapture::from_file(path_str, CAP_ANY)
        .map_err(|e| MediaError::invalid_video(format!("Failed to open video: {}", e)))?;

    if !cap.is_opened().unwrap_or(false) {
        return Err(MediaError::invalid_video(format!(
            "Failed to open video file: {}",
            path.display()
        )));
    }
    Ok(cap)
}

pub(crate) fn info_from_capture(cap: &VideoCapture) -> VideoInfo {
    let prop = |id| cap.get(id).unwrap_or(0.0);
    let fps = sanitize(prop(CAP_PROP_FPS));
    let frame_count = sanitize(prop(CAP_PROP_FRAME_COUNT)) as u64;
    let duration = if fps > 0.0 {
        frame_count as f64 / fps
    } else {
        0.0
    };

    VideoInfo {
        width: sanitize(prop(CAP_PROP_FRAME_WIDTH)) as u32,
        height: sanitize(prop(CAP_PROP_FRAME_HEIGHT)) as u32,
        fps,
        frame_count,
        duration,
    }
}

fn sanitize(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

/// Probe a video file for information.
pub fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let cap = open_capture(path.as_ref())?;
    Ok(info_from_capture(&cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let err = probe_video("/definitely/not/here.mp4").unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[test]
    fn test_garbage_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.mp4");
        std::fs::write(&path, b"this is not a video").unwrap();
        let err = probe_video(&path).unwrap_err();
        assert!(err.is_bad_input());
    }
}

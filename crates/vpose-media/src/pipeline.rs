//! The annotate pipeline: decode → sample → downscale → detect → draw → encode.
//!
//! Everything here is blocking OpenCV/ORT work; callers on an async runtime
//! should run it inside `spawn_blocking`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use opencv::core::{Mat, Size};
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::VideoWriter;
use tracing::{debug, info, warn};
use vpose_models::{AnnotationReport, JobProgress, ProcessingOptions};

use crate::error::{MediaError, MediaResult};
use crate::overlay::{draw_pose, OverlayStyle};
use crate::pose::PoseDetector;
use crate::probe::{info_from_capture, open_capture};
use crate::sampling::{output_fps, target_size, FrameSampler};

/// Shared cancellation flag checked once per frame.
pub type CancelFlag = Arc<AtomicBool>;

/// Abort after this many detector errors in a row.
pub const MAX_CONSECUTIVE_DETECT_FAILURES: u32 = 10;

/// Annotate `input` and write the result to `output` (MP4, `mp4v`).
///
/// Frames not selected by the sampler are only grabbed, not decoded.
/// Detector errors on individual frames are logged and the frame is written
/// without an overlay.
pub fn annotate_video<D, F>(
    input: &Path,
    output: &Path,
    options: &ProcessingOptions,
    detector: &mut D,
    mut on_progress: F,
    cancel: &AtomicBool,
) -> MediaResult<AnnotationReport>
where
    D: PoseDetector + ?Sized,
    F: FnMut(JobProgress),
{
    let started = Instant::now();
    let mut cap = open_capture(input)?;
    let source = info_from_capture(&cap);
    let sampler = FrameSampler::new(options.frame_stride);
    let fps = output_fps(source.fps, options.frame_stride);

    info!(
        input = %input.display(),
        width = source.width,
        height = source.height,
        fps = source.fps,
        frames = source.frame_count,
        stride = sampler.stride(),
        detector = detector.name(),
        "Annotating video"
    );

    let mut writer: Option<VideoWriter> = None;
    let mut out_size = (0u32, 0u32);
    let mut style = OverlayStyle::default();
    let mut frame = Mat::default();
    let mut scaled = Mat::default();

    let mut progress = JobProgress {
        frames_total: source.frame_count,
        ..Default::default()
    };
    let mut consecutive_failures = 0u32;
    let mut index: u64 = 0;

    loop {
        if cancel.load(Ordering::Relaxed) {
            info!(frames_read = progress.frames_read, "Annotation cancelled");
            return Err(MediaError::Cancelled);
        }

        if !sampler.should_process(index) {
            if !cap.grab()? {
                break;
            }
            index += 1;
            progress.frames_read += 1;
            continue;
        }

        if !cap.read(&mut frame)? || frame.empty() {
            break;
        }
        index += 1;
        progress.frames_read += 1;

        // The writer is opened from the first decoded frame, since some
        // containers report 0x0 until decoding starts.
        if writer.is_none() {
            out_size = target_size(frame.cols() as u32, frame.rows() as u32, options.target_width);
            style = OverlayStyle::for_width(out_size.0 as i32);
            writer = Some(open_writer(output, fps, out_size)?);
            debug!(width = out_size.0, height = out_size.1, fps, "Opened video writer");
        }

        let target = if (frame.cols() as u32, frame.rows() as u32) == out_size {
            &mut frame
        } else {
            imgproc::resize(
                &frame,
                &mut scaled,
                Size::new(out_size.0 as i32, out_size.1 as i32),
                0.0,
                0.0,
                imgproc::INTER_AREA,
            )?;
            &mut scaled
        };

        match detector.detect(&*target) {
            Ok(Some(pose)) => {
                consecutive_failures = 0;
                draw_pose(target, &pose, options.min_keypoint_score, &style)?;
                progress.frames_with_pose += 1;
            }
            Ok(None) => consecutive_failures = 0,
            Err(e) => {
                consecutive_failures += 1;
                warn!(frame = index - 1, "Pose detection failed: {}", e);
                if consecutive_failures >= MAX_CONSECUTIVE_DETECT_FAILURES {
                    return Err(MediaError::detection_failed(format!(
                        "{} consecutive detector failures, last: {}",
                        consecutive_failures, e
                    )));
                }
            }
        }

        if let Some(w) = writer.as_mut() {
            w.write(&*target)?;
        }
        progress.frames_written += 1;
        on_progress(progress);
    }

    let Some(mut writer) = writer else {
        return Err(MediaError::invalid_video("No frames could be decoded"));
    };
    writer.release()?;

    let report = AnnotationReport {
        frames_read: progress.frames_read,
        frames_written: progress.frames_written,
        frames_with_pose: progress.frames_with_pose,
        source_width: source.width,
        source_height: source.height,
        source_fps: source.fps,
        output_width: out_size.0,
        output_height: out_size.1,
        output_fps: fps,
        elapsed_secs: started.elapsed().as_secs_f64(),
    };

    info!(
        frames_read = report.frames_read,
        frames_written = report.frames_written,
        frames_with_pose = report.frames_with_pose,
        elapsed_secs = report.elapsed_secs,
        "Annotation finished"
    );

    Ok(report)
}

fn open_writer(output: &Path, fps: f64, (w, h): (u32, u32)) -> MediaResult<VideoWriter> {
    let path = output
        .to_str()
        .ok_or_else(|| MediaError::EncoderFailed("Output path is not valid UTF-8".to_string()))?;
    let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
    let writer = VideoWriter::new(path, fourcc, fps, Size::new(w as i32, h as i32), true)
        .map_err(|e| MediaError::EncoderFailed(e.to_string()))?;
    if !writer.is_opened()? {
        return Err(MediaError::EncoderFailed(format!(
            "VideoWriter failed to open {}",
            output.display()
        )));
    }
    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};
    use vpose_models::{Keypoint, KeypointKind, Pose};

    /// Detector that reports a fixed pose centered in the frame.
    struct FixedDetector {
        calls: usize,
    }

    impl PoseDetector for FixedDetector {
        fn detect(&mut self, frame_bgr: &Mat) -> MediaResult<Option<Pose>> {
            self.calls += 1;
            let (w, h) = (frame_bgr.cols() as f32, frame_bgr.rows() as f32);
            let mut kps = [Keypoint::new(w / 2.0, h / 2.0, 0.9); KeypointKind::COUNT];
            kps[KeypointKind::LeftAnkle.index()] = Keypoint::new(w / 4.0, h - 4.0, 0.9);
            Ok(Some(Pose::new(kps)))
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingDetector;

    impl PoseDetector for FailingDetector {
        fn detect(&mut self, _frame_bgr: &Mat) -> MediaResult<Option<Pose>> {
            Err(MediaError::detection_failed("boom"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn write_test_video(path: &Path, frames: usize, (w, h): (i32, i32)) {
        let fourcc = VideoWriter::fourcc('M', 'J', 'P', 'G').unwrap();
        let mut writer =
            VideoWriter::new(path.to_str().unwrap(), fourcc, 25.0, Size::new(w, h), true).unwrap();
        assert!(writer.is_opened().unwrap(), "test writer must open");
        for i in 0..frames {
            let shade = (i * 10 % 255) as f64;
            let frame =
                Mat::new_rows_cols_with_default(h, w, CV_8UC3, Scalar::all(shade)).unwrap();
            writer.write(&frame).unwrap();
        }
        writer.release().unwrap();
    }

    #[test]
    fn test_annotate_subsamples_and_downscales() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.avi");
        let output = dir.path().join("out.mp4");
        write_test_video(&input, 23, (1280, 720));

        let mut detector = FixedDetector { calls: 0 };
        let mut updates = 0;
        let cancel = AtomicBool::new(false);
        let report = annotate_video(
            &input,
            &output,
            &ProcessingOptions::default(),
            &mut detector,
            |_| updates += 1,
            &cancel,
        )
        .unwrap();

        assert_eq!(report.frames_read, 23);
        assert_eq!(report.frames_written, 5);
        assert_eq!(report.frames_with_pose, 5);
        assert_eq!(detector.calls, 5);
        assert_eq!((report.output_width, report.output_height), (640, 360));
        assert!((report.output_fps - 5.0).abs() < 1e-6);
        assert_eq!(updates, 5);

        let written = crate::probe::probe_video(&output).unwrap();
        assert_eq!((written.width, written.height), (640, 360));
    }

    #[test]
    fn test_annotate_honours_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.avi");
        write_test_video(&input, 5, (320, 240));

        let cancel = AtomicBool::new(true);
        let err = annotate_video(
            &input,
            &dir.path().join("out.mp4"),
            &ProcessingOptions::default(),
            &mut FixedDetector { calls: 0 },
            |_| {},
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
    }

    #[test]
    fn test_annotate_aborts_on_repeated_detector_failures() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.avi");
        write_test_video(&input, 60, (320, 240));

        let options = ProcessingOptions::default().with_frame_stride(1);
        let err = annotate_video(
            &input,
            &dir.path().join("out.mp4"),
            &options,
            &mut FailingDetector,
            |_| {},
            &AtomicBool::new(false),
        )
        .unwrap_err();
        assert!(matches!(err, MediaError::DetectionFailed(_)));
    }

    #[test]
    fn test_annotate_rejects_non_video() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        std::fs::write(&input, b"not a video").unwrap();

        let err = annotate_video(
            &input,
            &dir.path().join("out.mp4"),
            &ProcessingOptions::default(),
            &mut FixedDetector { calls: 0 },
            |_| {},
            &AtomicBool::new(false),
        )
        .unwrap_err();
        assert!(err.is_bad_input());
    }
}

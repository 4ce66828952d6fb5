//! Frame subsampling and output sizing.
//!
//! Only one frame out of every `stride` is decoded, annotated and written,
//! and written frames are downscaled to a bounded width. Together these keep
//! processing time roughly proportional to `duration / stride`.

/// Frame rate assumed when the container does not report one.
pub const FALLBACK_FPS: f64 = 25.0;

/// Selects which decoded frames are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSampler {
    stride: u64,
}

impl FrameSampler {
    /// A stride of 0 is treated as 1 (process every frame).
    pub fn new(stride: u32) -> Self {
        Self {
            stride: u64::from(stride.max(1)),
        }
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Frame indices 0, stride, 2·stride, … are processed.
    #[inline]
    pub fn should_process(&self, index: u64) -> bool {
        index % self.stride == 0
    }

    /// Number of frames written for a source with `total_frames` frames.
    pub fn expected_outputs(&self, total_frames: u64) -> u64 {
        total_frames.div_ceil(self.stride)
    }
}

/// Output dimensions for a `src_w`×`src_h` frame scaled to `target_width`.
///
/// Aspect ratio is preserved, frames are never upscaled, and both sides are
/// rounded down to even numbers (4:2:0 encoders reject odd sizes).
pub fn target_size(src_w: u32, src_h: u32, target_width: u32) -> (u32, u32) {
    let src_w = src_w.max(1);
    let src_h = src_h.max(1);

    let (w, h) = if src_w > target_width && target_width > 0 {
        let scale = target_width as f64 / src_w as f64;
        let h = (src_h as f64 * scale).round() as u32;
        (target_width, h)
    } else {
        (src_w, src_h)
    };

    (even_floor(w), even_floor(h))
}

fn even_floor(v: u32) -> u32 {
    (v & !1).max(2)
}

/// Frame rate of the annotated output.
///
/// Writing one frame per `stride` source frames at `src_fps / stride` keeps
/// the output duration equal to the source duration.
pub fn output_fps(src_fps: f64, stride: u32) -> f64 {
    let src = if src_fps.is_finite() && src_fps > 0.0 {
        src_fps
    } else {
        FALLBACK_FPS
    };
    (src / f64::from(stride.max(1))).max(1.0)
}

//! Square letterboxing for pose model input.
//!
//! The frame is scaled to fit a `size`×`size` canvas with its aspect ratio
//! preserved and centered with black padding. [`LetterboxMapping`] converts
//! normalized model coordinates back into frame pixels.

use opencv::core::{Mat, Scalar, Size, BORDER_CONSTANT};
use opencv::imgproc;
use opencv::prelude::*;

use crate::error::{MediaError, MediaResult};

/// Geometry of one letterbox operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxMapping {
    /// Canvas side length
    pub size: i32,
    /// Frame → canvas scale factor
    pub scale: f32,
    pub scaled_width: i32,
    pub scaled_height: i32,
    pub pad_left: i32,
    pub pad_top: i32,
}

impl LetterboxMapping {
    pub fn new(frame_width: i32, frame_height: i32, size: i32) -> Self {
        let fw = frame_width.max(1) as f32;
        let fh = frame_height.max(1) as f32;
        let scale = (size as f32 / fw).min(size as f32 / fh);
        let scaled_width = ((fw * scale).round() as i32).clamp(1, size);
        let scaled_height = ((fh * scale).round() as i32).clamp(1, size);
        Self {
            size,
            scale,
            scaled_width,
            scaled_height,
            pad_left: (size - scaled_width) / 2,
            pad_top: (size - scaled_height) / 2,
        }
    }

    /// Padding as (left, top, right, bottom).
    pub fn padding(&self) -> (i32, i32, i32, i32) {
        (
            self.pad_left,
            self.pad_top,
            self.size - self.scaled_width - self.pad_left,
            self.size - self.scaled_height - self.pad_top,
        )
    }

    /// Map normalized canvas coordinates (0..1) to frame pixels.
    pub fn to_frame(&self, nx: f32, ny: f32) -> (f32, f32) {
        let cx = nx * self.size as f32;
        let cy = ny * self.size as f32;
        (
            (cx - self.pad_left as f32) / self.scale,
            (cy - self.pad_top as f32) / self.scale,
        )
    }
}

/// Letterbox a BGR frame into a square canvas.
pub fn letterbox(frame: &Mat, size: i32) -> MediaResult<(Mat, LetterboxMapping)> {
    if frame.empty() {
        return Err(MediaError::detection_failed("Empty frame provided"));
    }

    let mapping = LetterboxMapping::new(frame.cols(), frame.rows(), size);

    let mut resized = Mat::default();
    imgproc::resize(
        frame,
        &mut resized,
        Size::new(mapping.scaled_width, mapping.scaled_height),
        0.0,
        0.0,
        imgproc::INTER_AREA,
    )
    .map_err(|e| MediaError::detection_failed(format!("Resize failed: {}", e)))?;

    let (left, top, right, bottom) = mapping.padding();
    let mut canvas = Mat::default();
    opencv::core::copy_make_border(
        &resized,
        &mut canvas,
        top,
        bottom,
        left,
        right,
        BORDER_CONSTANT,
        Scalar::all(0.0),
    )
    .map_err(|e| MediaError::detection_failed(format!("Padding failed: {}", e)))?;

    Ok((canvas, mapping))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landscape_padding_is_vertical() {
        let m = LetterboxMapping::new(640, 360, 192);
        assert_eq!(m.scaled_width, 192);
        assert_eq!(m.scaled_height, 108);
        assert_eq!(m.padding(), (0, 42, 0, 42));
    }

    #[test]
    fn test_portrait_padding_is_horizontal() {
        let m = LetterboxMapping::new(360, 640, 192);
        assert_eq!(m.scaled_width, 108);
        assert_eq!(m.padding(), (42, 0, 42, 0));
    }

    #[test]
    fn test_to_frame_roundtrips_center_and_corner() {
        let m = LetterboxMapping::new(640, 360, 192);
        let (cx, cy) = m.to_frame(0.5, 0.5);
        assert!((cx - 320.0).abs() < 0.5 && (cy - 180.0).abs() < 0.5);

        // Top-left of the image content, not of the padded canvas.
        let ny = 42.0 / 192.0;
        let (x0, y0) = m.to_frame(0.0, ny);
        assert!(x0.abs() < 1e-3 && y0.abs() < 1e-3);
    }

    #[test]
    fn test_odd_padding_sums_to_canvas() {
        let m = LetterboxMapping::new(641, 359, 192);
        let (l, t, r, b) = m.padding();
        assert_eq!(l + r + m.scaled_width, 192);
        assert_eq!(t + b + m.scaled_height, 192);
    }
}

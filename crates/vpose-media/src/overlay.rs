//! Skeleton overlay drawing.

use opencv::core::{Mat, Point, Scalar};
use opencv::imgproc;
use vpose_models::{KeypointKind, Limb, Pose};

use crate::error::MediaResult;

/// BGR color triple.
pub type Bgr = (u8, u8, u8);

/// Colors and stroke sizes used to draw a pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayStyle {
    /// Limbs on the subject's left side
    pub left_color: Bgr,
    /// Limbs on the subject's right side
    pub right_color: Bgr,
    /// Torso and face limbs crossing the midline
    pub center_color: Bgr,
    pub keypoint_color: Bgr,
    pub limb_thickness: i32,
    pub keypoint_radius: i32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            left_color: (255, 128, 0),
            right_color: (0, 128, 255),
            center_color: (0, 255, 0),
            keypoint_color: (255, 255, 255),
            limb_thickness: 2,
            keypoint_radius: 4,
        }
    }
}

impl OverlayStyle {
    /// Default colors with strokes sized for a frame `width` pixels wide.
    pub fn for_width(width: i32) -> Self {
        Self {
            limb_thickness: (width / 320).max(2),
            keypoint_radius: (width / 160).max(3),
            ..Self::default()
        }
    }

    pub fn limb_color(&self, limb: Limb) -> Bgr {
        match (side(limb.0), side(limb.1)) {
            (Side::Left, Side::Left) => self.left_color,
            (Side::Right, Side::Right) => self.right_color,
            _ => self.center_color,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
    Center,
}

fn side(kind: KeypointKind) -> Side {
    let name = kind.name();
    if name.starts_with("left_") {
        Side::Left
    } else if name.starts_with("right_") {
        Side::Right
    } else {
        Side::Center
    }
}

fn scalar((b, g, r): Bgr) -> Scalar {
    Scalar::new(f64::from(b), f64::from(g), f64::from(r), 0.0)
}

fn point(x: f32, y: f32) -> Point {
    Point::new(x.round() as i32, y.round() as i32)
}

/// Draw limbs then keypoints of `pose` onto `frame`, skipping anything
/// below `threshold`. Returns the number of limbs drawn.
pub fn draw_pose(frame: &mut Mat, pose: &Pose, threshold: f32, style: &OverlayStyle) -> MediaResult<usize> {
    let limbs = pose.visible_limbs(threshold);
    for (limb, a, b) in &limbs {
        imgproc::line(
            frame,
            point(a.x, a.y),
            point(b.x, b.y),
            scalar(style.limb_color(*limb)),
            style.limb_thickness,
            imgproc::LINE_AA,
            0,
        )?;
    }

    for (_, kp) in pose.visible_keypoints(threshold) {
        imgproc::circle(
            frame,
            point(kp.x, kp.y),
            style.keypoint_radius,
            scalar(style.keypoint_color),
            imgproc::FILLED,
            imgproc::LINE_AA,
            0,
        )?;
    }

    Ok(limbs.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Vec3b, CV_8UC3};
    use opencv::prelude::*;
    use vpose_models::Keypoint;

    #[test]
    fn test_limb_colors_by_side() {
        let style = OverlayStyle::default();
        assert_eq!(
            style.limb_color((KeypointKind::LeftKnee, KeypointKind::LeftAnkle)),
            style.left_color
        );
        assert_eq!(
            style.limb_color((KeypointKind::RightElbow, KeypointKind::RightWrist)),
            style.right_color
        );
        assert_eq!(
            style.limb_color((KeypointKind::LeftHip, KeypointKind::RightHip)),
            style.center_color
        );
        assert_eq!(
            style.limb_color((KeypointKind::Nose, KeypointKind::LeftEye)),
            style.center_color
        );
    }

    #[test]
    fn test_style_scales_with_width() {
        assert_eq!(OverlayStyle::for_width(640).limb_thickness, 2);
        assert_eq!(OverlayStyle::for_width(1920).limb_thickness, 6);
        assert_eq!(OverlayStyle::for_width(100).keypoint_radius, 3);
    }

    #[test]
    fn test_draw_pose_paints_pixels() {
        let mut frame =
            Mat::new_rows_cols_with_default(100, 100, CV_8UC3, Scalar::all(0.0)).unwrap();
        let mut keypoints = [Keypoint::new(0.0, 0.0, 0.0); KeypointKind::COUNT];
        keypoints[KeypointKind::LeftShoulder.index()] = Keypoint::new(20.0, 50.0, 0.9);
        keypoints[KeypointKind::RightShoulder.index()] = Keypoint::new(80.0, 50.0, 0.9);
        let pose = Pose::new(keypoints);

        let drawn = draw_pose(&mut frame, &pose, 0.5, &OverlayStyle::default()).unwrap();
        assert_eq!(drawn, 1);

        let mid = frame.at_2d::<Vec3b>(50, 50).unwrap();
        assert_ne!(*mid, Vec3b::from([0, 0, 0]));
        let corner = frame.at_2d::<Vec3b>(5, 5).unwrap();
        assert_eq!(*corner, Vec3b::from([0, 0, 0]));
    }
}

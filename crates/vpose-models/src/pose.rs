//! Pose keypoints and the COCO skeleton topology.
//!
//! Single-person pose models such as MoveNet emit the 17 COCO keypoints.
//! Coordinates stored here are always in frame pixel space.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The 17 COCO body keypoints, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum KeypointKind {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl KeypointKind {
    /// Number of keypoints produced per pose.
    pub const COUNT: usize = 17;

    /// All keypoints in model output order.
    pub const ALL: [KeypointKind; Self::COUNT] = [
        KeypointKind::Nose,
        KeypointKind::LeftEye,
        KeypointKind::RightEye,
        KeypointKind::LeftEar,
        KeypointKind::RightEar,
        KeypointKind::LeftShoulder,
        KeypointKind::RightShoulder,
        KeypointKind::LeftElbow,
        KeypointKind::RightElbow,
        KeypointKind::LeftWrist,
        KeypointKind::RightWrist,
        KeypointKind::LeftHip,
        KeypointKind::RightHip,
        KeypointKind::LeftKnee,
        KeypointKind::RightKnee,
        KeypointKind::LeftAnkle,
        KeypointKind::RightAnkle,
    ];

    /// Position of this keypoint in the model output.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            KeypointKind::Nose => "nose",
            KeypointKind::LeftEye => "left_eye",
            KeypointKind::RightEye => "right_eye",
            KeypointKind::LeftEar => "left_ear",
            KeypointKind::RightEar => "right_ear",
            KeypointKind::LeftShoulder => "left_shoulder",
            KeypointKind::RightShoulder => "right_shoulder",
            KeypointKind::LeftElbow => "left_elbow",
            KeypointKind::RightElbow => "right_elbow",
            KeypointKind::LeftWrist => "left_wrist",
            KeypointKind::RightWrist => "right_wrist",
            KeypointKind::LeftHip => "left_hip",
            KeypointKind::RightHip => "right_hip",
            KeypointKind::LeftKnee => "left_knee",
            KeypointKind::RightKnee => "right_knee",
            KeypointKind::LeftAnkle => "left_ankle",
            KeypointKind::RightAnkle => "right_ankle",
        }
    }
}

/// A pair of keypoints joined by a limb segment.
pub type Limb = (KeypointKind, KeypointKind);

/// COCO pose skeleton (19 limbs).
pub const SKELETON: [Limb; 19] = [
    (KeypointKind::LeftAnkle, KeypointKind::LeftKnee),
    (KeypointKind::LeftKnee, KeypointKind::LeftHip),
    (KeypointKind::RightAnkle, KeypointKind::RightKnee),
    (KeypointKind::RightKnee, KeypointKind::RightHip),
    (KeypointKind::LeftHip, KeypointKind::RightHip),
    (KeypointKind::LeftShoulder, KeypointKind::LeftHip),
    (KeypointKind::RightShoulder, KeypointKind::RightHip),
    (KeypointKind::LeftShoulder, KeypointKind::RightShoulder),
    (KeypointKind::LeftShoulder, KeypointKind::LeftElbow),
    (KeypointKind::RightShoulder, KeypointKind::RightElbow),
    (KeypointKind::LeftElbow, KeypointKind::LeftWrist),
    (KeypointKind::RightElbow, KeypointKind::RightWrist),
    (KeypointKind::LeftEye, KeypointKind::RightEye),
    (KeypointKind::Nose, KeypointKind::LeftEye),
    (KeypointKind::Nose, KeypointKind::RightEye),
    (KeypointKind::LeftEye, KeypointKind::LeftEar),
    (KeypointKind::RightEye, KeypointKind::RightEar),
    (KeypointKind::LeftEar, KeypointKind::LeftShoulder),
    (KeypointKind::RightEar, KeypointKind::RightShoulder),
];

/// A single keypoint in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Model confidence in [0, 1]
    pub score: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, score: f32) -> Self {
        Self { x, y, score }
    }

    /// Whether this keypoint is confident enough to draw.
    pub fn is_visible(&self, threshold: f32) -> bool {
        self.score >= threshold && self.x.is_finite() && self.y.is_finite()
    }
}

/// One detected person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Pose {
    /// Keypoints indexed by [`KeypointKind::index`]
    pub keypoints: [Keypoint; KeypointKind::COUNT],
}

impl Pose {
    pub fn new(keypoints: [Keypoint; KeypointKind::COUNT]) -> Self {
        Self { keypoints }
    }

    pub fn get(&self, kind: KeypointKind) -> &Keypoint {
        &self.keypoints[kind.index()]
    }

    /// Average confidence over all keypoints.
    pub fn mean_score(&self) -> f32 {
        let sum: f32 = self.keypoints.iter().map(|k| k.score).sum();
        sum / KeypointKind::COUNT as f32
    }

    /// Keypoints at or above `threshold`.
    pub fn visible_keypoints(&self, threshold: f32) -> impl Iterator<Item = (KeypointKind, &Keypoint)> + '_ {
        KeypointKind::ALL
            .iter()
            .map(move |&kind| (kind, self.get(kind)))
            .filter(move |(_, kp)| kp.is_visible(threshold))
    }

    /// Limb segments whose endpoints are both at or above `threshold`.
    pub fn visible_limbs(&self, threshold: f32) -> Vec<(Limb, Keypoint, Keypoint)> {
        SKELETON
            .iter()
            .filter_map(|&(a, b)| {
                let (ka, kb) = (self.get(a), self.get(b));
                (ka.is_visible(threshold) && kb.is_visible(threshold)).then_some(((a, b), *ka, *kb))
            })
            .collect()
    }

    /// Apply an affine map `p' = p * scale + offset` to every keypoint.
    pub fn transformed(&self, scale: f32, offset_x: f32, offset_y: f32) -> Self {
        let mut out = self.clone();
        for kp in out.keypoints.iter_mut() {
            kp.x = kp.x * scale + offset_x;
            kp.y = kp.y * scale + offset_y;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose_with_scores(score: f32) -> Pose {
        let mut keypoints = [Keypoint::new(0.0, 0.0, score); KeypointKind::COUNT];
        for (i, kp) in keypoints.iter_mut().enumerate() {
            kp.x = i as f32 * 10.0;
            kp.y = i as f32 * 5.0;
        }
        Pose::new(keypoints)
    }

    #[test]
    fn test_all_matches_indices() {
        for (i, kind) in KeypointKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
        assert_eq!(KeypointKind::RightAnkle.name(), "right_ankle");
    }

    #[test]
    fn test_visible_limbs_respects_threshold() {
        let mut pose = pose_with_scores(0.9);
        assert_eq!(pose.visible_limbs(0.5).len(), SKELETON.len());

        // Hiding the left knee removes both limbs touching it.
        pose.keypoints[KeypointKind::LeftKnee.index()].score = 0.1;
        assert_eq!(pose.visible_limbs(0.5).len(), SKELETON.len() - 2);
        assert_eq!(pose.visible_keypoints(0.5).count(), KeypointKind::COUNT - 1);
    }

    #[test]
    fn test_nan_coordinates_are_hidden() {
        let mut pose = pose_with_scores(0.9);
        pose.keypoints[0].x = f32::NAN;
        assert!(!pose.get(KeypointKind::Nose).is_visible(0.1));
    }

    #[test]
    fn test_mean_score() {
        let pose = pose_with_scores(0.4);
        assert!((pose.mean_score() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_transformed() {
        let pose = pose_with_scores(1.0).transformed(2.0, 1.0, -1.0);
        let kp = pose.get(KeypointKind::LeftEye);
        assert_eq!((kp.x, kp.y), (21.0, 9.0));
    }
}

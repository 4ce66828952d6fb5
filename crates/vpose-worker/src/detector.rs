//! Detector construction for jobs.
//!
//! Each job gets its own detector, built on the blocking thread that runs
//! the pipeline.

use vpose_media::{MediaError, MediaResult, MoveNetConfig, MoveNetDetector, PoseDetector};

/// Builds pose detectors for the executor.
pub trait DetectorFactory: Send + Sync + 'static {
    /// Build a detector. Called from a blocking thread.
    fn create(&self) -> MediaResult<Box<dyn PoseDetector>>;

    /// Whether `create` can be expected to succeed (readiness probe).
    fn is_available(&self) -> bool;

    fn name(&self) -> &str;
}

/// ONNX Runtime MoveNet detectors.
#[derive(Debug, Clone)]
pub struct MoveNetFactory {
    config: Option<MoveNetConfig>,
}

impl MoveNetFactory {
    pub fn new(config: MoveNetConfig) -> Self {
        Self {
            config: Some(config),
        }
    }

    /// Locate the model from the environment. A missing model yields a
    /// factory that reports itself unavailable.
    pub fn from_env() -> Self {
        match MoveNetConfig::from_env() {
            Ok(config) => Self::new(config),
            Err(e) => {
                tracing::warn!("Pose model unavailable: {}", e);
                Self { config: None }
            }
        }
    }

    pub fn config(&self) -> Option<&MoveNetConfig> {
        self.config.as_ref()
    }
}

impl DetectorFactory for MoveNetFactory {
    fn create(&self) -> MediaResult<Box<dyn PoseDetector>> {
        let config = self.config.clone().ok_or_else(|| {
            MediaError::model_not_found("no MoveNet model configured (POSE_MODEL_PATH)")
        })?;
        Ok(Box::new(MoveNetDetector::load(config)?))
    }

    fn is_available(&self) -> bool {
        self.config
            .as_ref()
            .is_some_and(|c| c.model_path.is_file())
    }

    fn name(&self) -> &str {
        "movenet"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_unavailable() {
        let factory = MoveNetFactory::new(MoveNetConfig::new("/nope/movenet.onnx"));
        assert!(!factory.is_available());
        assert!(matches!(factory.create().err(), Some(MediaError::ModelNotFound(_))));
    }

    #[test]
    fn test_unconfigured_factory() {
        let factory = MoveNetFactory { config: None };
        assert!(!factory.is_available());
        assert!(factory.create().is_err());
    }
}

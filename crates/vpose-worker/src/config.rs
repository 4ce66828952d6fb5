//! Worker configuration.

use std::time::Duration;

use vpose_models::options::{DEFAULT_FRAME_STRIDE, DEFAULT_MIN_KEYPOINT_SCORE, DEFAULT_TARGET_WIDTH};
use vpose_models::ProcessingOptions;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Jobs waiting for a slot before submissions are refused
    pub queue_capacity: usize,
    /// Job timeout
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Finished jobs older than this are removed (None keeps them forever)
    pub retention: Option<Duration>,
    /// How often the retention sweeper runs
    pub sweep_interval: Duration,
    /// Re-encode outputs to H.264 with FFmpeg when available
    pub web_transcode: bool,
    /// Options applied when an upload does not override them
    pub default_options: ProcessingOptions,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            queue_capacity: 32,
            job_timeout: Duration::from_secs(1800), // 30 minutes
            shutdown_timeout: Duration::from_secs(30),
            retention: Some(Duration::from_secs(86_400)),
            sweep_interval: Duration::from_secs(300),
            web_transcode: true,
            default_options: ProcessingOptions::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let retention_secs: u64 = env_parse("RETENTION_SECS").unwrap_or(86_400);

        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            queue_capacity: env_parse("WORKER_QUEUE_CAPACITY")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.queue_capacity),
            job_timeout: Duration::from_secs(env_parse("WORKER_JOB_TIMEOUT").unwrap_or(1800)),
            shutdown_timeout: Duration::from_secs(
                env_parse("WORKER_SHUTDOWN_TIMEOUT").unwrap_or(30),
            ),
            retention: (retention_secs > 0).then(|| Duration::from_secs(retention_secs)),
            sweep_interval: Duration::from_secs(
                env_parse("RETENTION_SWEEP_SECS")
                    .filter(|s: &u64| *s > 0)
                    .unwrap_or(300),
            ),
            web_transcode: std::env::var("WEB_TRANSCODE")
                .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(true),
            default_options: options_from_env(),
        }
    }
}

/// Processing defaults from `FRAME_STRIDE`, `TARGET_WIDTH` and
/// `MIN_KEYPOINT_SCORE`. Values that fail validation fall back to the
/// built-in default for that field.
fn options_from_env() -> ProcessingOptions {
    let mut options = ProcessingOptions::default();

    let stride = env_parse("FRAME_STRIDE").unwrap_or(DEFAULT_FRAME_STRIDE);
    if options.with_frame_stride(stride).validate().is_ok() {
        options = options.with_frame_stride(stride);
    }
    let width = env_parse("TARGET_WIDTH").unwrap_or(DEFAULT_TARGET_WIDTH);
    if options.with_target_width(width).validate().is_ok() {
        options = options.with_target_width(width);
    }
    let score = env_parse("MIN_KEYPOINT_SCORE").unwrap_or(DEFAULT_MIN_KEYPOINT_SCORE);
    if options.with_min_keypoint_score(score).validate().is_ok() {
        options = options.with_min_keypoint_score(score);
    }

    options
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.default_options.frame_stride, 5);
        assert_eq!(config.default_options.target_width, 640);
        assert!(config.retention.is_some());
    }
}

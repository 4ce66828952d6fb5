//! API configuration.

use std::net::IpAddr;
use std::path::PathBuf;

/// Default upload size limit (512 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;

/// Room for multipart boundaries and the small option fields.
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Upload rate limit per client IP (requests per second)
    pub rate_limit_rps: u32,
    /// Upload rate limit burst
    pub rate_limit_burst: u32,
    /// Reverse proxies allowed to set `X-Forwarded-For` / `X-Real-IP`
    pub trusted_proxies: Vec<IpAddr>,
    /// Largest accepted video file
    pub max_upload_bytes: u64,
    /// Directory holding `uploads/` and `outputs/`
    pub data_dir: PathBuf,
    /// Environment (development/production)
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 2,
            rate_limit_burst: 5,
            trusted_proxies: Vec::new(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            data_dir: PathBuf::from("./data"),
            environment: "development".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: std::env::var("RATE_LIMIT_RPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rate_limit_rps),
            rate_limit_burst: std::env::var("RATE_LIMIT_BURST")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rate_limit_burst),
            trusted_proxies: std::env::var("TRUSTED_PROXIES")
                .map(|s| parse_ip_list(&s))
                .unwrap_or(defaults.trusted_proxies),
            max_upload_bytes: std::env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_upload_bytes),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Request body limit for `POST /upload`.
    pub fn max_body_bytes(&self) -> usize {
        usize::try_from(self.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES))
            .unwrap_or(usize::MAX)
    }
}

/// Comma separated IPs; entries that don't parse are skipped.
fn parse_ip_list(value: &str) -> Vec<IpAddr> {
    value
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

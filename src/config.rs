//! Configuration types for canvas-backup
//!
//! The configuration is an explicit struct handed to constructors. It is read
//! from a TOML file, optionally overlaid with environment variables, and
//! checked by [`Config::validate`] before any network activity.
//!
//! ```toml
//! [canvas]
//! base_url = "https://school.instructure.com"
//!
//! [backup]
//! output_dir = "/srv/canvas-backups"
//! max_concurrent_backups = 5
//! retention_count = 10
//!
//! [export]
//! max_poll_attempts = 600
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Environment variable overriding `canvas.base_url`
pub const ENV_BASE_URL: &str = "CANVAS_BASE_URL";
/// Environment variable providing `canvas.api_token`
pub const ENV_API_TOKEN: &str = "CANVAS_API_TOKEN";

/// Main configuration
///
/// Fields are organized into sub-configs:
/// - [`canvas`](CanvasConfig) — instance URL and credentials
/// - [`backup`](BackupConfig) — output layout, worker pool, retention
/// - [`api`](ApiConfig) — request gating, rate limiting, timeouts
/// - [`export`](ExportConfig) — export type and polling budget
/// - [`retry`](RetryConfig) — transient-error backoff
/// - [`disk_space`](DiskSpaceConfig) — pre-download free space check
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Canvas instance and credentials
    #[serde(default)]
    pub canvas: CanvasConfig,

    /// Backup output and scheduling
    #[serde(default)]
    pub backup: BackupConfig,

    /// HTTP client behaviour
    #[serde(default)]
    pub api: ApiConfig,

    /// Content export behaviour
    #[serde(default)]
    pub export: ExportConfig,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Disk space checking before downloads
    #[serde(default)]
    pub disk_space: DiskSpaceConfig,
}

/// Canvas instance settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CanvasConfig {
    /// Base URL of the Canvas instance (e.g., "https://school.instructure.com")
    #[serde(default)]
    pub base_url: String,

    /// API access token (usually supplied through `CANVAS_API_TOKEN` instead)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

impl CanvasConfig {
    /// Base URL without trailing slashes
    pub fn base_url(&self) -> &str {
        self.base_url.trim().trim_end_matches('/')
    }
}

/// Backup output, worker pool and retention settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Root directory for course archives (default: per-user data dir)
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Number of courses backed up concurrently (default: 5)
    #[serde(default = "default_max_concurrent_backups")]
    pub max_concurrent_backups: usize,

    /// Archives kept per course; older ones are deleted (default: 10)
    #[serde(default = "default_retention_count")]
    pub retention_count: usize,

    /// Bytes written per chunk while downloading (default: 1 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_concurrent_backups: default_max_concurrent_backups(),
            retention_count: default_retention_count(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// HTTP client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Maximum API requests in flight across all workers (default: 10)
    #[serde(default = "default_max_in_flight_requests")]
    pub max_in_flight_requests: usize,

    /// Delay slept before every API request (default: 100 ms)
    #[serde(default = "default_courtesy_delay", with = "duration_ms_serde")]
    pub courtesy_delay: Duration,

    /// Wait after HTTP 429 when the server sends no `Retry-After` (default: 1 second)
    #[serde(default = "default_rate_limit_delay", with = "duration_ms_serde")]
    pub rate_limit_delay: Duration,

    /// Timeout for a single API request (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Timeout for a whole archive download (default: 1 hour)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub download_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_in_flight_requests: default_max_in_flight_requests(),
            courtesy_delay: default_courtesy_delay(),
            rate_limit_delay: default_rate_limit_delay(),
            request_timeout: default_request_timeout(),
            download_timeout: default_download_timeout(),
        }
    }
}

/// Content export settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Export type requested from Canvas (default: "common_cartridge")
    #[serde(default = "default_export_type")]
    pub export_type: String,

    /// Delay between progress checks (default: 1 second)
    #[serde(default = "default_poll_interval", with = "duration_ms_serde")]
    pub poll_interval: Duration,

    /// Progress checks before giving up on an export (default: 600)
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            export_type: default_export_type(),
            poll_interval: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Disk space checking configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSpaceConfig {
    /// Enable disk space checking (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Free space to leave on the disk after a download (default: 256 MiB)
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,
}

impl Default for DiskSpaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_free_space: default_min_free_space(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read '{}': {}", path.display(), e),
            key: None,
        })?;
        Self::from_toml(&raw)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config {
            message: e.to_string(),
            key: None,
        })
    }

    /// Overlay `CANVAS_BASE_URL` and `CANVAS_API_TOKEN` from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay environment values supplied by `lookup`; empty values are ignored
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.canvas.base_url = url;
        }
        if let Some(token) = lookup(ENV_API_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.canvas.api_token = Some(token);
        }
    }

    /// The API token, or a configuration error naming where to provide it
    pub fn api_token(&self) -> Result<&str> {
        self.canvas
            .api_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::config(
                    "canvas.api_token",
                    format!("no API token configured (set {})", ENV_API_TOKEN),
                )
            })
    }

    /// Check that the configuration is usable
    ///
    /// Pure: performs no I/O and never prompts.
    pub fn validate(&self) -> Result<()> {
        let base_url = self.canvas.base_url();
        if base_url.is_empty() {
            return Err(Error::config(
                "canvas.base_url",
                format!("no base URL configured (set {})", ENV_BASE_URL),
            ));
        }
        let parsed = url::Url::parse(base_url).map_err(|e| {
            Error::config("canvas.base_url", format!("'{}' is not a URL: {}", base_url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(Error::config(
                "canvas.base_url",
                format!("'{}' must be an http(s) URL with a host", base_url),
            ));
        }

        self.api_token()?;

        if self.backup.max_concurrent_backups == 0 {
            return Err(Error::config(
                "backup.max_concurrent_backups",
                "must be at least 1",
            ));
        }
        if self.backup.retention_count == 0 {
            return Err(Error::config("backup.retention_count", "must be at least 1"));
        }
        if self.backup.chunk_size == 0 {
            return Err(Error::config("backup.chunk_size", "must be at least 1"));
        }
        if self.api.max_in_flight_requests == 0 {
            return Err(Error::config(
                "api.max_in_flight_requests",
                "must be at least 1",
            ));
        }
        if self.export.max_poll_attempts == 0 {
            return Err(Error::config("export.max_poll_attempts", "must be at least 1"));
        }
        if self.export.export_type.trim().is_empty() {
            return Err(Error::config("export.export_type", "must not be empty"));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                format!("must be a finite number of at least 1.0, got {}", multiplier),
            ));
        }

        Ok(())
    }
}

// Default value functions
fn default_output_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("canvas-backup").join("backups"))
        .unwrap_or_else(|| PathBuf::from("backups"))
}

fn default_max_concurrent_backups() -> usize {
    5
}

fn default_retention_count() -> usize {
    10
}

fn default_chunk_size() -> usize {
    1024 * 1024
}

fn default_max_in_flight_requests() -> usize {
    10
}

fn default_courtesy_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_rate_limit_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_export_type() -> String {
    "common_cartridge".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_poll_attempts() -> u32 {
    600
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_min_free_space() -> u64 {
    256 * 1024 * 1024
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

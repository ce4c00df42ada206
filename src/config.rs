//! Configuration types for registry-mirror

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Remote registry settings (where artifacts are fetched from)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the flat artifact container
    /// (default: "https://api.nuget.org/v3-flatcontainer/")
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,

    /// Artifact file extension without the dot (default: "nupkg")
    #[serde(default = "default_artifact_extension")]
    pub artifact_extension: String,

    /// Whole-request timeout for one artifact (default: 300 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// TCP connect timeout (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url_prefix: default_url_prefix(),
            artifact_extension: default_artifact_extension(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Filesystem locations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Flat local artifact store (default: "./mirror/packages")
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Directory holding `*.txt` arrival logs awaiting ingestion (default: "./mirror/logs")
    #[serde(default = "default_pending_dir")]
    pub pending_dir: PathBuf,

    /// Directory consumed logs are moved to (default: "./mirror/logs-processed")
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,

    /// Directory for per-worker `error_<n>.txt` files (default: "./mirror/errors")
    #[serde(default = "default_error_log_dir")]
    pub error_log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            pending_dir: default_pending_dir(),
            archive_dir: default_archive_dir(),
            error_log_dir: default_error_log_dir(),
        }
    }
}

/// Download pool settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Number of concurrent download workers (default: 8)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Emit a progress line every this many dispatched packages (default: 1000)
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            progress_interval: default_progress_interval(),
        }
    }
}

/// What to do with a log line that does not parse
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsePolicy {
    /// Log the line and continue with the rest of the file (default)
    #[default]
    SkipLine,
    /// Discard everything the file contributed and leave it pending
    RejectFile,
}

/// Log ingestion settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Malformed line handling
    #[serde(default)]
    pub parse_policy: ParsePolicy,
}

/// Pending-directory polling settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Sleep between idle cycles (default: 1 second)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Wake early when a new log file lands in the pending directory (default: true)
    #[serde(default = "default_true")]
    pub notify: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            notify: true,
        }
    }
}

/// Retry configuration for transient fetch failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
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

/// Main configuration for the mirror
///
/// Every section has defaults, so an empty TOML document is a valid configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote registry settings
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Filesystem locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Download pool settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Log ingestion settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Polling settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Retry settings for transient fetch failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config {
            message: e.to_string(),
            key: None,
        })
    }

    /// Check invariants the rest of the crate relies on
    pub fn validate(&self) -> Result<()> {
        if self.download.workers == 0 {
            return Err(Error::config("download.workers", "must be at least 1"));
        }
        if self.download.progress_interval == 0 {
            return Err(Error::config(
                "download.progress_interval",
                "must be at least 1",
            ));
        }
        if self.remote.artifact_extension.is_empty()
            || self.remote.artifact_extension.starts_with('.')
        {
            return Err(Error::config(
                "remote.artifact_extension",
                "must be a non-empty extension without a leading dot",
            ));
        }
        if self.watch.poll_interval.is_zero() {
            return Err(Error::config("watch.poll_interval", "must be greater than zero"));
        }
        let url = url::Url::parse(&self.remote.url_prefix).map_err(|e| {
            Error::config(
                "remote.url_prefix",
                format!("'{}' is not a valid URL: {}", self.remote.url_prefix, e),
            )
        })?;
        if url.cannot_be_a_base() {
            return Err(Error::config(
                "remote.url_prefix",
                format!("'{}' cannot be used as a base URL", self.remote.url_prefix),
            ));
        }
        Ok(())
    }
}

fn default_url_prefix() -> String {
    "https://api.nuget.org/v3-flatcontainer/".to_string()
}

fn default_artifact_extension() -> String {
    "nupkg".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./mirror/packages")
}

fn default_pending_dir() -> PathBuf {
    PathBuf::from("./mirror/logs")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("./mirror/logs-processed")
}

fn default_error_log_dir() -> PathBuf {
    PathBuf::from("./mirror/errors")
}

fn default_workers() -> usize {
    8
}

fn default_progress_interval() -> u64 {
    1000
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (seconds, fractional values allowed)
mod duration_serde {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Whole(u64),
        Fractional(f64),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_u64(duration.as_secs())
        } else {
            serializer.serialize_f64(duration.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Seconds::deserialize(deserializer)? {
            Seconds::Whole(secs) => Ok(Duration::from_secs(secs)),
            Seconds::Fractional(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|e| D::Error::custom(format!("invalid duration {secs}: {e}"))),
        }
    }
}

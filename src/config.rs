//! Configuration types for transfer-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Queue behaviour configuration (directory, concurrency, health checks)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Download directory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum concurrent transfers (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Interval between health checks (default: 5 seconds)
    #[serde(default = "default_health_check_interval", with = "duration_serde")]
    pub health_check_interval: Duration,

    /// A running transfer without byte progress for this long is restarted (default: 30 seconds)
    #[serde(default = "default_stall_threshold", with = "duration_serde")]
    pub stall_threshold: Duration,

    /// Interval between store flushes (default: 2 seconds)
    #[serde(default = "default_flush_interval", with = "duration_serde")]
    pub flush_interval: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            health_check_interval: default_health_check_interval(),
            stall_threshold: default_stall_threshold(),
            flush_interval: default_flush_interval(),
        }
    }
}

/// Torrent engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TorrentConfig {
    /// Keep uploading after a torrent completes (default: false)
    ///
    /// When disabled every peer wire is choked and upload-throttled to zero.
    #[serde(default)]
    pub seeding_enabled: bool,

    /// Milliseconds between `torrent-progress` events per session (default: 1000)
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Interval between re-choking all wires while seeding is disabled (default: 5 seconds)
    #[serde(default = "default_rechoke_interval", with = "duration_serde")]
    pub rechoke_interval: Duration,

    /// Trackers appended to every torrent
    #[serde(default = "default_trackers")]
    pub default_trackers: Vec<String>,

    /// Deadline for torrent worker calls (default: 30 seconds)
    #[serde(default = "default_call_timeout", with = "duration_serde")]
    pub call_timeout: Duration,

    /// How long to wait for a freshly launched torrent worker to report ready (default: 10 seconds)
    #[serde(default = "default_ready_timeout", with = "duration_serde")]
    pub ready_timeout: Duration,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            seeding_enabled: false,
            progress_interval_ms: default_progress_interval_ms(),
            rechoke_interval: default_rechoke_interval(),
            default_trackers: default_trackers(),
            call_timeout: default_call_timeout(),
            ready_timeout: default_ready_timeout(),
        }
    }
}

impl TorrentConfig {
    /// Progress interval as a [`Duration`]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}

/// Archive extraction configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Extract archives when their transfers complete (default: true)
    #[serde(default = "default_true")]
    pub auto_extract: bool,

    /// Delete archive files after a successful extraction (default: false)
    #[serde(default)]
    pub delete_archives_after_extract: bool,

    /// Deadline for one extraction job (default: 1 hour)
    #[serde(default = "default_extraction_timeout", with = "duration_serde")]
    pub extraction_timeout: Duration,

    /// How long to wait for a freshly launched worker to report ready (default: 10 seconds)
    #[serde(default = "default_ready_timeout", with = "duration_serde")]
    pub worker_ready_timeout: Duration,

    /// Path to the `transfer-worker` executable (auto-detected if None)
    #[serde(default)]
    pub worker_path: Option<PathBuf>,

    /// Whether to search PATH for the worker if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            auto_extract: true,
            delete_archives_after_extract: false,
            extraction_timeout: default_extraction_timeout(),
            worker_ready_timeout: default_ready_timeout(),
            worker_path: None,
            search_path: true,
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./transfer-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Debrid service endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DebridConfig {
    /// Resolution endpoint; receives `POST {"url": ...}`
    pub endpoint: String,

    /// Bearer token sent with each request
    #[serde(default)]
    pub api_token: Option<String>,

    /// Request timeout (default: 30 seconds)
    #[serde(default = "default_debrid_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

/// Main configuration for TransferManager
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) - directory, concurrency, health checks
/// - [`torrent`](TorrentConfig) - seeding policy and torrent worker timing
/// - [`extraction`](ExtractionConfig) - archive extraction and worker discovery
///
/// Sub-configs are flattened, so the serialized form has no nesting for them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Queue behaviour settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Torrent engine settings
    #[serde(flatten)]
    pub torrent: TorrentConfig,

    /// Archive extraction settings
    #[serde(flatten)]
    pub extraction: ExtractionConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Debrid link resolution (disabled when None)
    #[serde(default)]
    pub debrid: Option<DebridConfig>,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Check the configuration for values the manager cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "max_concurrent_downloads must be at least 1".to_string(),
                key: Some("max_concurrent_downloads".to_string()),
            });
        }
        if self.download.stall_threshold.is_zero() {
            return Err(Error::Config {
                message: "stall_threshold must be greater than zero".to_string(),
                key: Some("stall_threshold".to_string()),
            });
        }
        if self.download.health_check_interval.is_zero() || self.download.flush_interval.is_zero() {
            return Err(Error::Config {
                message: "health_check_interval and flush_interval must be greater than zero"
                    .to_string(),
                key: Some("health_check_interval".to_string()),
            });
        }
        if self.torrent.progress_interval_ms == 0 || self.torrent.rechoke_interval.is_zero() {
            return Err(Error::Config {
                message: "progress_interval_ms and rechoke_interval must be greater than zero"
                    .to_string(),
                key: Some("progress_interval_ms".to_string()),
            });
        }
        if let Some(debrid) = &self.debrid {
            url::Url::parse(&debrid.endpoint).map_err(|e| Error::Config {
                message: format!("invalid debrid endpoint '{}': {}", debrid.endpoint, e),
                key: Some("debrid.endpoint".to_string()),
            })?;
        }
        Ok(())
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./transfer-dl.db")
}

fn default_true() -> bool {
    true
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_stall_threshold() -> Duration {
    Duration::from_secs(30)
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_rechoke_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_extraction_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_ready_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_debrid_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_trackers() -> Vec<String> {
    vec![
        "udp://tracker.opentrackr.org:1337/announce".to_string(),
        "udp://open.stealth.si:80/announce".to_string(),
        "udp://tracker.torrent.eu.org:451/announce".to_string(),
    ]
}

// Duration serialization helper
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

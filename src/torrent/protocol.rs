//! Messages exchanged with the torrent worker.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Event carrying resolved metadata
pub const TORRENT_METADATA_EVENT: &str = "torrent-metadata";
/// Periodic per-session counters
pub const TORRENT_PROGRESS_EVENT: &str = "torrent-progress";
/// Terminal success
pub const TORRENT_DONE_EVENT: &str = "torrent-done";
/// Engine failure
pub const TORRENT_ERROR_EVENT: &str = "torrent-error";

/// Commands understood by the torrent worker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum TorrentCommand {
    /// Start a torrent
    Add {
        /// Transfer id chosen by the host
        torrent_id: String,
        /// Magnet URI, info hash or torrent file reference
        source: String,
        /// Destination directory
        destination: PathBuf,
        /// Tracker announce URLs
        #[serde(default)]
        trackers: Vec<String>,
    },
    /// Destroy the session, keeping the locator for a later resume
    Pause {
        /// Transfer id
        torrent_id: String,
    },
    /// Recreate a paused session
    Resume {
        /// Transfer id
        torrent_id: String,
    },
    /// Forget a torrent
    Remove {
        /// Transfer id
        torrent_id: String,
        /// Also delete downloaded content
        #[serde(default)]
        delete_files: bool,
    },
    /// Toggle seeding at runtime
    SetSeeding {
        /// Whether peers may download from us
        enabled: bool,
    },
}

/// Payload of `torrent-metadata`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentMetadata {
    /// Transfer id
    pub torrent_id: String,
    /// Torrent name
    pub name: String,
    /// Total size in bytes
    pub total_bytes: u64,
    /// Hex info hash
    pub info_hash: String,
}

/// Payload of `torrent-progress`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentProgress {
    /// Transfer id
    pub torrent_id: String,
    /// Bytes downloaded
    pub downloaded: u64,
    /// Bytes uploaded (0 when seeding is disabled)
    pub uploaded: u64,
    /// Fraction complete (0.0 to 1.0)
    pub progress: f64,
    /// Download rate in bytes per second
    pub download_speed: f64,
    /// Upload rate in bytes per second (0 when seeding is disabled)
    pub upload_speed: f64,
    /// Connected peers
    pub peers: usize,
}

/// Payload of `torrent-done`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentDone {
    /// Transfer id
    pub torrent_id: String,
    /// Content location, when metadata resolved it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Payload of `torrent-error`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentFailure {
    /// Transfer id
    pub torrent_id: String,
    /// Engine message
    pub error: String,
}

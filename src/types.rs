//! Core types for transfer-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a transfer
///
/// Generated at admission and stable for the record's lifetime. The string form
/// doubles as the `torrentId` on the torrent worker wire protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub uuid::Uuid);

impl TransferId {
    /// Generate a fresh random TransferId
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TransferId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Which acquisition path a transfer uses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Direct HTTP(S) download driven by the host download engine
    Http,
    /// BitTorrent transfer driven by the torrent worker
    Torrent,
}

impl TransferKind {
    /// Guess the kind from a source locator
    ///
    /// `magnet:` URIs, `.torrent` references and bare 40-char info hashes are
    /// torrents; everything else is HTTP.
    pub fn detect(source: &str) -> Self {
        let lower = source.trim().to_ascii_lowercase();
        let is_info_hash = lower.len() == 40 && lower.chars().all(|c| c.is_ascii_hexdigit());
        if lower.starts_with("magnet:") || lower.ends_with(".torrent") || is_info_hash {
            TransferKind::Torrent
        } else {
            TransferKind::Http
        }
    }

    /// Stable name used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Http => "http",
            TransferKind::Torrent => "torrent",
        }
    }

    /// Parse the database name back into a kind
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "http" => Some(TransferKind::Http),
            "torrent" => Some(TransferKind::Torrent),
            _ => None,
        }
    }
}

/// Transfer lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Admitted and waiting for a concurrency slot
    Pending,
    /// Currently transferring
    Downloading,
    /// Paused by the user or by over-budget correction
    Paused,
    /// Archive extraction in flight
    Extracting,
    /// Finished successfully
    Completed,
    /// Failed with an error message
    Error,
    /// Cancelled; the record is removed from the store
    Cancelled,
}

impl Status {
    /// Convert integer status code to Status enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => Status::Pending,
            1 => Status::Downloading,
            2 => Status::Paused,
            3 => Status::Extracting,
            4 => Status::Completed,
            5 => Status::Error,
            6 => Status::Cancelled,
            _ => Status::Error, // Default to Error for unknown status
        }
    }

    /// Convert Status enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            Status::Pending => 0,
            Status::Downloading => 1,
            Status::Paused => 2,
            Status::Extracting => 3,
            Status::Completed => 4,
            Status::Error => 5,
            Status::Cancelled => 6,
        }
    }

    /// Terminal states accept no further mutation except explicit removal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Error | Status::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`
    ///
    /// `completed -> extracting` is the one exit from a terminal state; it is
    /// used when the last part of a multi-part archive completes and the already
    /// finished siblings join the extraction.
    pub fn can_transition_to(&self, next: Status) -> bool {
        use Status::*;
        match (self, next) {
            (Pending, Downloading | Paused | Error | Cancelled) => true,
            (Downloading, Paused | Pending | Completed | Extracting | Error | Cancelled) => true,
            (Paused, Downloading | Pending | Error | Cancelled) => true,
            (Completed, Extracting) => true,
            (Extracting, Completed | Error) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Pending => "pending",
            Status::Downloading => "downloading",
            Status::Paused => "paused",
            Status::Extracting => "extracting",
            Status::Completed => "completed",
            Status::Error => "error",
            Status::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One download or torrent tracked by the manager
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Stable identifier
    pub id: TransferId,
    /// Acquisition path
    pub kind: TransferKind,
    /// File name (torrent name once metadata arrives)
    pub filename: String,
    /// URL, magnet URI or torrent reference
    pub source: String,
    /// Destination directory
    pub destination: PathBuf,
    /// Declared total size (unknown until metadata arrives)
    pub total_bytes: Option<u64>,
    /// Bytes transferred so far
    pub transferred_bytes: u64,
    /// Bytes uploaded so far (torrents only)
    pub uploaded_bytes: u64,
    /// Lifecycle status
    pub status: Status,
    /// Smoothed throughput in bytes per second
    pub speed_bps: f64,
    /// Archive group key for multi-part archive members
    pub group: Option<String>,
    /// Extraction progress/status text
    pub extraction: Option<String>,
    /// Error message when status is `error`
    pub error: Option<String>,
    /// Torrent info hash once known
    pub info_hash: Option<String>,
    /// Host engine token used to resume an interrupted download after restart
    pub resume_token: Option<String>,
    /// Tracker announce URLs (torrents only)
    pub trackers: Vec<String>,
    /// Unix timestamp of admission
    pub created_at: i64,
    /// Unix timestamp of first start
    pub started_at: Option<i64>,
    /// Unix timestamp of completion
    pub completed_at: Option<i64>,
}

impl TransferRecord {
    /// Full path of the transferred file
    pub fn file_path(&self) -> PathBuf {
        self.destination.join(&self.filename)
    }

    /// Progress percentage (0.0 to 100.0), `None` while the size is unknown
    pub fn percent(&self) -> Option<f32> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                Some(((self.transferred_bytes as f64 / total as f64) * 100.0).min(100.0) as f32)
            }
            _ => None,
        }
    }
}

/// Request to admit a new transfer
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewTransfer {
    /// URL, magnet URI or torrent reference
    pub source: String,
    /// Destination directory (defaults to the configured download directory)
    #[serde(default)]
    pub destination: Option<PathBuf>,
    /// File name override (defaults to the last URL path segment)
    #[serde(default)]
    pub filename: Option<String>,
    /// Kind override (defaults to [`TransferKind::detect`])
    #[serde(default)]
    pub kind: Option<TransferKind>,
    /// Additional tracker URLs for torrents
    #[serde(default)]
    pub trackers: Vec<String>,
    /// Resolve the source through the debrid service before downloading
    #[serde(default)]
    pub use_debrid: bool,
    /// Declared size, when the caller already knows it
    #[serde(default)]
    pub total_bytes: Option<u64>,
}

/// Event emitted to the presentation layer
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Transfer admitted
    Added {
        /// Transfer ID
        id: TransferId,
        /// File name
        filename: String,
        /// Acquisition path
        kind: TransferKind,
    },

    /// Status changed
    StatusChanged {
        /// Transfer ID
        id: TransferId,
        /// New status
        status: Status,
    },

    /// Progress update
    Progress {
        /// Transfer ID
        id: TransferId,
        /// Bytes transferred so far
        transferred_bytes: u64,
        /// Declared total size
        #[serde(skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
        /// Bytes uploaded so far
        uploaded_bytes: u64,
        /// Smoothed speed in bytes per second
        speed_bps: f64,
        /// Progress percentage (0.0 to 100.0)
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<f32>,
    },

    /// Torrent metadata arrived
    Metadata {
        /// Transfer ID
        id: TransferId,
        /// Torrent name
        name: String,
        /// Total size in bytes
        #[serde(skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
        /// Info hash
        #[serde(skip_serializing_if = "Option::is_none")]
        info_hash: Option<String>,
    },

    /// Extraction progress for one member of an archive group
    Extracting {
        /// Transfer ID
        id: TransferId,
        /// Extraction progress (0.0 to 100.0)
        percent: f32,
    },

    /// Transfer fully complete
    Completed {
        /// Transfer ID
        id: TransferId,
        /// Final location (extracted folder for archives)
        path: PathBuf,
    },

    /// Transfer failed
    Failed {
        /// Transfer ID
        id: TransferId,
        /// Error message
        error: String,
    },

    /// Transfer removed from the store
    Removed {
        /// Transfer ID
        id: TransferId,
    },

    /// Concurrency budget changed
    ConcurrencyChanged {
        /// New maximum number of running transfers
        max_concurrent: usize,
    },

    /// A worker process exited
    WorkerExited {
        /// Worker kind name
        worker: String,
    },

    /// Manager shutting down
    Shutdown,
}

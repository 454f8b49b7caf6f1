//! Port to the peer-to-peer library driven by the torrent worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// One connected peer
pub trait PeerWire: Send + Sync {
    /// Stop sending pieces to this peer
    fn choke(&self);

    /// Cap upload to this peer, in bytes per second (0 blocks uploads)
    fn throttle_upload(&self, bytes_per_sec: u64);

    /// Whether the connection is gone
    fn is_closed(&self) -> bool;
}

/// Snapshot of a session's counters
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionStats {
    /// Bytes downloaded
    pub downloaded: u64,
    /// Bytes uploaded
    pub uploaded: u64,
    /// Fraction complete (0.0 to 1.0)
    pub progress: f64,
    /// Download rate in bytes per second
    pub download_speed: f64,
    /// Upload rate in bytes per second
    pub upload_speed: f64,
    /// Connected peers
    pub peers: usize,
}

/// Metadata resolved by the library
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedMetadata {
    /// Torrent name
    pub name: String,
    /// Total content size in bytes
    pub total_bytes: u64,
    /// Hex info hash
    pub info_hash: String,
    /// Where the content lands on disk
    pub content_path: PathBuf,
}

/// Notifications from a live session
pub enum SessionEvent {
    /// Metadata resolved
    Metadata(ResolvedMetadata),
    /// A peer connected
    WireAttached(Arc<dyn PeerWire>),
    /// All pieces verified
    Done,
    /// The library gave up on the session
    Error(String),
}

/// A live torrent inside the library
#[async_trait]
pub trait TorrentSession: Send + Sync {
    /// Current counters
    fn stats(&self) -> SessionStats;

    /// Currently connected peers
    fn wires(&self) -> Vec<Arc<dyn PeerWire>>;

    /// Tear the session down, optionally deleting downloaded content
    ///
    /// The session's event stream closes afterwards.
    async fn destroy(&self, delete_files: bool);
}

/// A freshly opened session and its event stream
pub struct OpenedSession {
    /// The session
    pub session: Box<dyn TorrentSession>,
    /// Events raised by the session; closes when the session is destroyed
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// Peer-to-peer library supplied by the host
#[async_trait]
pub trait TorrentBackend: Send + Sync {
    /// Open a session for a magnet URI, info hash or torrent file reference
    ///
    /// Returns once the library accepted the torrent; metadata arrives later
    /// as [`SessionEvent::Metadata`].
    async fn open(
        &self,
        locator: &str,
        destination: &Path,
        trackers: &[String],
    ) -> Result<OpenedSession, String>;
}

//! Ports between the scheduler and the engines that move bytes
//!
//! The scheduler never calls an engine directly. It issues fire-and-forget
//! [`EngineCommand`]s through a [`CommandSink`] and learns what happened from
//! [`EngineSignal`]s delivered through a [`SignalSink`]. The host's HTTP engine
//! implements [`DownloadEngine`]; torrents and extraction go through their
//! worker gateways.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::archive::ExtractionJob;
use crate::error::Result;
use crate::types::{TransferId, TransferKind, TransferRecord};
use crate::worker::WorkerKind;

/// Engine-side condition of a running download
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EngineState {
    /// Bytes are flowing (or the engine is waiting on the network)
    #[default]
    Progressing,
    /// The engine stopped on its own (network drop, server reset)
    Interrupted,
}

/// Terminal outcome reported by an engine
#[derive(Clone, Debug, PartialEq)]
pub enum FinishOutcome {
    /// All bytes landed; `path` overrides the expected file location
    Completed {
        /// Final file or folder, when it differs from destination/filename
        path: Option<PathBuf>,
    },
    /// The engine gave up
    Failed(String),
    /// The engine cancelled the download itself
    Cancelled,
}

/// Raw notification from an engine or worker
#[derive(Clone, Debug, PartialEq)]
pub enum EngineSignal {
    /// The engine began transferring
    Started {
        /// Transfer
        id: TransferId,
        /// Size, when the server declared one
        total_bytes: Option<u64>,
    },
    /// Cumulative counters
    Progress {
        /// Transfer
        id: TransferId,
        /// Bytes received so far
        transferred_bytes: u64,
        /// Size, when known
        total_bytes: Option<u64>,
        /// Bytes sent to peers
        uploaded_bytes: u64,
        /// Engine condition
        state: EngineState,
        /// Whether the engine can resume an interruption
        can_resume: bool,
    },
    /// Torrent metadata resolved
    Metadata {
        /// Transfer
        id: TransferId,
        /// Torrent name
        name: String,
        /// Total size
        total_bytes: u64,
        /// Info hash
        info_hash: String,
    },
    /// Serialized engine state for restoring after a restart
    ResumeToken {
        /// Transfer
        id: TransferId,
        /// Opaque token understood by [`DownloadEngine::restore`]
        token: String,
    },
    /// Terminal outcome
    Finished {
        /// Transfer
        id: TransferId,
        /// What happened
        outcome: FinishOutcome,
    },
    /// Extraction progress for an archive key
    ExtractionProgress {
        /// Archive key
        key: String,
        /// Percentage (0.0 to 100.0)
        percent: f32,
    },
    /// Extraction job finished
    ExtractionFinished {
        /// Archive key
        key: String,
        /// Extracted folder, or the worker's error message
        result: std::result::Result<PathBuf, String>,
    },
    /// A worker died unexpectedly
    WorkerExited {
        /// Which worker
        worker: WorkerKind,
    },
}

impl EngineSignal {
    /// Transfer the signal is about, if any
    pub fn transfer_id(&self) -> Option<TransferId> {
        match self {
            EngineSignal::Started { id, .. }
            | EngineSignal::Progress { id, .. }
            | EngineSignal::Metadata { id, .. }
            | EngineSignal::ResumeToken { id, .. }
            | EngineSignal::Finished { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Delivers engine signals to the control loop
#[derive(Clone)]
pub struct SignalSink {
    deliver: Arc<dyn Fn(EngineSignal) + Send + Sync>,
}

impl SignalSink {
    /// Create a sink from a delivery function
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(EngineSignal) + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Deliver a signal
    pub fn send(&self, signal: EngineSignal) {
        (self.deliver)(signal);
    }
}

impl std::fmt::Debug for SignalSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSink").finish_non_exhaustive()
    }
}

/// What an engine needs to start or restore a transfer
#[derive(Clone, Debug, PartialEq)]
pub struct TransferTarget {
    /// Transfer
    pub id: TransferId,
    /// Acquisition path
    pub kind: TransferKind,
    /// URL, magnet URI or torrent reference
    pub source: String,
    /// Destination directory
    pub destination: PathBuf,
    /// File name
    pub filename: String,
    /// Tracker URLs (torrents)
    pub trackers: Vec<String>,
}

impl From<&TransferRecord> for TransferTarget {
    fn from(record: &TransferRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            source: record.source.clone(),
            destination: record.destination.clone(),
            filename: record.filename.clone(),
            trackers: record.trackers.clone(),
        }
    }
}

/// Fire-and-forget instruction from the scheduler
#[derive(Clone, Debug, PartialEq)]
pub enum EngineCommand {
    /// Begin a fresh transfer
    Start(TransferTarget),
    /// Continue a transfer the engine already knows
    Resume(TransferTarget),
    /// Recreate an interrupted HTTP download from its token
    Restore {
        /// Transfer
        target: TransferTarget,
        /// Token from [`EngineSignal::ResumeToken`]
        token: String,
    },
    /// Stop moving bytes, keeping partial data
    Pause {
        /// Transfer
        id: TransferId,
        /// Acquisition path
        kind: TransferKind,
    },
    /// Tear the transfer down
    Cancel {
        /// Transfer
        id: TransferId,
        /// Acquisition path
        kind: TransferKind,
        /// Delete downloaded data
        delete_files: bool,
        /// Expected file location (HTTP)
        path: PathBuf,
    },
    /// Run an extraction job
    Extract(ExtractionJob),
    /// Delete files from disk
    DeleteFiles(Vec<PathBuf>),
}

/// Receives scheduler commands
pub trait CommandSink: Send + Sync {
    /// Hand a command to the engines; must not block
    fn dispatch(&self, command: EngineCommand);
}

/// Host HTTP download engine
///
/// Implementations report through the [`SignalSink`] handed to
/// [`attach`](Self::attach). Every method returns once the engine accepted the
/// request.
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Register the sink signals are delivered to
    fn attach(&self, sink: SignalSink);

    /// Begin downloading `target.source` into `target.destination/target.filename`
    async fn start(&self, target: &TransferTarget) -> Result<()>;

    /// Pause a running download
    async fn pause(&self, id: TransferId) -> Result<()>;

    /// Resume a paused or interrupted download
    async fn resume(&self, id: TransferId) -> Result<()>;

    /// Cancel a download and drop its partial data
    async fn cancel(&self, id: TransferId) -> Result<()>;

    /// Recreate a download interrupted by a restart
    async fn restore(&self, target: &TransferTarget, token: &str) -> Result<()>;
}

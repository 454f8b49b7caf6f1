//! Error types for transfer-dl
//!
//! This module provides the error taxonomy of the library:
//! - [`Error`] - the crate-level error returned by public operations
//! - [`TransferError`] - lifecycle violations on a single transfer
//! - [`WorkerError`] - failures talking to an out-of-process worker
//! - [`ExtractionError`] - archive decoding failures inside the extraction worker
//!
//! Engine-reported failures never surface as errors past the scheduler; they are
//! written into the affected record's `status`/`error` fields instead.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::{Status, TransferId};
use crate::worker::WorkerKind;

/// Result type alias for transfer-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for transfer-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_downloads")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Transfer lifecycle error
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Worker communication error
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Archive extraction error
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Debrid service could not resolve a link
    #[error("debrid error: {0}")]
    Debrid(String),

    /// Source locator is neither a URL nor a torrent reference
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - the control loop no longer accepts commands
    #[error("shutdown in progress: not accepting commands")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored row could not be mapped back to a record
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Transfer lifecycle errors
#[derive(Debug, Error)]
pub enum TransferError {
    /// Transfer not found in the store
    #[error("transfer {id} not found")]
    NotFound {
        /// The transfer ID that was not found
        id: TransferId,
    },

    /// The state machine does not allow this transition
    #[error("transfer {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The transfer ID
        id: TransferId,
        /// Current status
        from: Status,
        /// Requested status
        to: Status,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} transfer {id} in state {current}")]
    InvalidState {
        /// The transfer ID
        id: TransferId,
        /// The operation that was attempted (e.g., "pause", "cancel")
        operation: &'static str,
        /// The current status that prevents the operation
        current: Status,
    },

    /// No engine is configured for this kind of transfer
    #[error("no engine configured for {0} transfers")]
    NoEngine(&'static str),
}

/// Worker gateway errors
///
/// Cloneable so a single failure can be fanned out to every pending request.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker has not signalled readiness yet (or was never started)
    #[error("{kind} worker is not ready")]
    NotReady {
        /// Worker kind
        kind: WorkerKind,
    },

    /// The worker exited while the request was outstanding
    #[error("{kind} worker is unavailable")]
    Unavailable {
        /// Worker kind
        kind: WorkerKind,
    },

    /// The request deadline elapsed before a response arrived
    #[error("{kind} worker did not answer within {after:?}")]
    Timeout {
        /// Worker kind
        kind: WorkerKind,
        /// Deadline that elapsed
        after: Duration,
    },

    /// The worker answered with an error
    #[error("{0}")]
    Failed(String),

    /// The worker could not be launched
    #[error("failed to launch worker: {0}")]
    Launch(String),

    /// A message could not be encoded or decoded
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Archive extraction errors raised by the extraction worker
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// File extension does not name a supported archive format
    #[error("unsupported archive: {0}")]
    UnsupportedArchive(PathBuf),

    /// A split archive is missing one of its volumes
    #[error("missing volume {volume} for {archive}")]
    MissingVolume {
        /// Entry point of the archive
        archive: PathBuf,
        /// Expected volume path
        volume: PathBuf,
    },

    /// Decoder reported a failure
    #[error("failed to extract {archive}: {reason}")]
    Failed {
        /// The archive that failed
        archive: PathBuf,
        /// Decoder message
        reason: String,
    },
}

impl Error {
    /// Whether the failed action may succeed if the caller retries it
    ///
    /// Only worker availability problems and transient network/I/O failures are
    /// retryable; everything else needs user action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Worker(e) => matches!(
                e,
                WorkerError::NotReady { .. }
                    | WorkerError::Unavailable { .. }
                    | WorkerError::Timeout { .. }
            ),
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
            ),
            _ => false,
        }
    }
}

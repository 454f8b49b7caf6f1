//! Database layer for transfer-dl
//!
//! Handles SQLite persistence for transfer records and archive extraction keys.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`transfers`] - Transfer record upserts and queries
//! - [`archives`] - Archive extraction keys
//! - [`state`] - Runtime state (shutdown tracking)

use crate::archive::ArchiveKeyState;
use crate::error::DatabaseError;
use crate::store::TransferPersistence;
use crate::types::{Status, TransferId, TransferKind, TransferRecord};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod archives;
mod migrations;
mod state;
mod transfers;

/// Transfer record as stored in the `transfers` table
#[derive(Debug, Clone, FromRow)]
pub struct TransferRow {
    /// UUID string
    pub id: String,
    /// Kind name ("http" or "torrent")
    pub kind: String,
    /// File name
    pub filename: String,
    /// Source locator
    pub source: String,
    /// Destination directory
    pub destination: String,
    /// Declared total size in bytes
    pub total_bytes: Option<i64>,
    /// Bytes transferred so far
    pub transferred_bytes: i64,
    /// Bytes uploaded so far
    pub uploaded_bytes: i64,
    /// Status code (see [`Status::to_i32`])
    pub status: i32,
    /// Last smoothed speed
    pub speed_bps: f64,
    /// Archive group key
    pub group_key: Option<String>,
    /// Extraction status text
    pub extraction: Option<String>,
    /// Error message
    pub error_message: Option<String>,
    /// Torrent info hash
    pub info_hash: Option<String>,
    /// Host engine resume token
    pub resume_token: Option<String>,
    /// JSON array of tracker URLs
    pub trackers: String,
    /// Unix timestamp of admission
    pub created_at: i64,
    /// Unix timestamp of first start
    pub started_at: Option<i64>,
    /// Unix timestamp of completion
    pub completed_at: Option<i64>,
}

impl TryFrom<TransferRow> for TransferRecord {
    type Error = Error;

    fn try_from(row: TransferRow) -> Result<Self> {
        let id = row.id.parse::<TransferId>().map_err(|e| {
            Error::Database(DatabaseError::CorruptRow(format!(
                "invalid transfer id '{}': {}",
                row.id, e
            )))
        })?;
        let kind = TransferKind::from_name(&row.kind).ok_or_else(|| {
            Error::Database(DatabaseError::CorruptRow(format!(
                "unknown transfer kind '{}' for {}",
                row.kind, id
            )))
        })?;
        let trackers: Vec<String> = serde_json::from_str(&row.trackers).map_err(|e| {
            Error::Database(DatabaseError::CorruptRow(format!(
                "invalid trackers for {}: {}",
                id, e
            )))
        })?;

        Ok(TransferRecord {
            id,
            kind,
            filename: row.filename,
            source: row.source,
            destination: PathBuf::from(row.destination),
            total_bytes: row.total_bytes.map(|b| b.max(0) as u64),
            transferred_bytes: row.transferred_bytes.max(0) as u64,
            uploaded_bytes: row.uploaded_bytes.max(0) as u64,
            status: Status::from_i32(row.status),
            speed_bps: row.speed_bps,
            group: row.group_key,
            extraction: row.extraction,
            error: row.error_message,
            info_hash: row.info_hash,
            resume_token: row.resume_token,
            trackers,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

/// Database handle for transfer-dl
pub struct Database {
    pool: SqlitePool,
}

#[async_trait]
impl TransferPersistence for Database {
    async fn load_transfers(&self) -> Result<Vec<TransferRecord>> {
        self.list_transfers().await
    }

    async fn save_transfers(&self, records: &[TransferRecord]) -> Result<()> {
        self.upsert_transfers(records).await
    }

    async fn delete_transfers(&self, ids: &[TransferId]) -> Result<()> {
        Database::delete_transfers(self, ids).await
    }

    async fn load_archive_keys(&self) -> Result<Vec<(String, ArchiveKeyState)>> {
        self.list_archive_keys().await
    }

    async fn save_archive_key(&self, key: &str, state: ArchiveKeyState) -> Result<()> {
        self.set_archive_key(key, state).await
    }

    async fn delete_archive_key(&self, key: &str) -> Result<()> {
        self.clear_archive_key(key).await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

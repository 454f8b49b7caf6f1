//! Transfer record upserts and queries.

use crate::error::DatabaseError;
use crate::types::{TransferId, TransferRecord};
use crate::{Error, Result};

use super::{Database, TransferRow};

const SELECT_TRANSFER: &str = r#"
    SELECT
        id, kind, filename, source, destination, total_bytes,
        transferred_bytes, uploaded_bytes, status, speed_bps, group_key,
        extraction, error_message, info_hash, resume_token, trackers,
        created_at, started_at, completed_at
    FROM transfers
"#;

impl Database {
    /// Insert or replace a batch of records in one transaction
    pub async fn upsert_transfers(&self, records: &[TransferRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        for record in records {
            let trackers = serde_json::to_string(&record.trackers)?;
            sqlx::query(
                r#"
                INSERT INTO transfers (
                    id, kind, filename, source, destination, total_bytes,
                    transferred_bytes, uploaded_bytes, status, speed_bps, group_key,
                    extraction, error_message, info_hash, resume_token, trackers,
                    created_at, started_at, completed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    kind = excluded.kind,
                    filename = excluded.filename,
                    source = excluded.source,
                    destination = excluded.destination,
                    total_bytes = excluded.total_bytes,
                    transferred_bytes = excluded.transferred_bytes,
                    uploaded_bytes = excluded.uploaded_bytes,
                    status = excluded.status,
                    speed_bps = excluded.speed_bps,
                    group_key = excluded.group_key,
                    extraction = excluded.extraction,
                    error_message = excluded.error_message,
                    info_hash = excluded.info_hash,
                    resume_token = excluded.resume_token,
                    trackers = excluded.trackers,
                    started_at = excluded.started_at,
                    completed_at = excluded.completed_at
                "#,
            )
            .bind(record.id.to_string())
            .bind(record.kind.as_str())
            .bind(&record.filename)
            .bind(&record.source)
            .bind(record.destination.to_string_lossy().into_owned())
            .bind(record.total_bytes.map(|b| b as i64))
            .bind(record.transferred_bytes as i64)
            .bind(record.uploaded_bytes as i64)
            .bind(record.status.to_i32())
            .bind(record.speed_bps)
            .bind(&record.group)
            .bind(&record.extraction)
            .bind(&record.error)
            .bind(&record.info_hash)
            .bind(&record.resume_token)
            .bind(trackers)
            .bind(record.created_at)
            .bind(record.started_at)
            .bind(record.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to upsert transfer {}: {}",
                    record.id, e
                )))
            })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit transfers: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a record by ID
    pub async fn get_transfer(&self, id: TransferId) -> Result<Option<TransferRecord>> {
        let row = sqlx::query_as::<_, TransferRow>(&format!("{SELECT_TRANSFER} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get transfer: {}",
                    e
                )))
            })?;

        row.map(TransferRecord::try_from).transpose()
    }

    /// List all records, oldest first
    pub async fn list_transfers(&self) -> Result<Vec<TransferRecord>> {
        let rows =
            sqlx::query_as::<_, TransferRow>(&format!("{SELECT_TRANSFER} ORDER BY created_at ASC, rowid ASC"))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to list transfers: {}",
                        e
                    )))
                })?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match TransferRecord::try_from(row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::error!(error = %e, "Skipping unreadable transfer row"),
            }
        }
        Ok(records)
    }

    /// Delete records by ID
    pub async fn delete_transfers(&self, ids: &[TransferId]) -> Result<()> {
        for id in ids {
            sqlx::query("DELETE FROM transfers WHERE id = ?")
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to delete transfer: {}",
                        e
                    )))
                })?;
        }

        Ok(())
    }
}

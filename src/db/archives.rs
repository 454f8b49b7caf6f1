//! Archive extraction keys (dispatched / extracted markers).

use crate::archive::ArchiveKeyState;
use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

impl Database {
    /// Insert or replace an archive key
    pub async fn set_archive_key(&self, key: &str, state: ArchiveKeyState) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO archive_keys (key, state, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(state.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set archive key: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get the state of an archive key
    pub async fn get_archive_key(&self, key: &str) -> Result<Option<ArchiveKeyState>> {
        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM archive_keys WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to get archive key: {}",
                        e
                    )))
                })?;

        Ok(state.as_deref().and_then(ArchiveKeyState::from_name))
    }

    /// List every archive key
    pub async fn list_archive_keys(&self) -> Result<Vec<(String, ArchiveKeyState)>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, state FROM archive_keys")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list archive keys: {}",
                    e
                )))
            })?;

        Ok(rows
            .into_iter()
            .filter_map(|(key, state)| match ArchiveKeyState::from_name(&state) {
                Some(state) => Some((key, state)),
                None => {
                    tracing::warn!(key = %key, state = %state, "Ignoring archive key with unknown state");
                    None
                }
            })
            .collect())
    }

    /// Remove an archive key
    pub async fn clear_archive_key(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM archive_keys WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear archive key: {}",
                    e
                )))
            })?;

        Ok(())
    }
}

//! Runtime markers kept across process restarts.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

const RUNNING_KEY: &str = "running";

impl Database {
    /// Whether the previous session ended without [`set_clean_shutdown`]
    ///
    /// A fresh database has no previous session and reads as clean.
    ///
    /// [`set_clean_shutdown`]: Self::set_clean_shutdown
    pub async fn was_unclean_shutdown(&self) -> Result<bool> {
        Ok(self.runtime_value(RUNNING_KEY).await?.as_deref() == Some("true"))
    }

    /// Mark this session as running until [`set_clean_shutdown`](Self::set_clean_shutdown)
    pub async fn set_clean_start(&self) -> Result<()> {
        self.set_runtime_value(RUNNING_KEY, "true").await
    }

    /// Mark this session as ended cleanly
    pub async fn set_clean_shutdown(&self) -> Result<()> {
        self.set_runtime_value(RUNNING_KEY, "false").await
    }

    async fn runtime_value(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "reading runtime state '{key}': {e}"
                )))
            })
    }

    async fn set_runtime_value(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO runtime_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "writing runtime state '{key}': {e}"
            )))
        })?;
        Ok(())
    }
}

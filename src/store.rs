//! Transfer record store - the single source of truth for transfer state
//!
//! [`TransferStore`] is an in-memory cache of every [`TransferRecord`] plus the
//! durable set of archive extraction keys. Only the scheduler holds a mutable
//! reference to it; every mutation marks the touched entry dirty and
//! [`TransferStore::flush`] writes the dirty set through the injected
//! [`TransferPersistence`] port.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::archive::ArchiveKeyState;
use crate::error::{Result, TransferError};
use crate::types::{Status, TransferId, TransferRecord};

/// Durable storage behind the record store
#[async_trait]
pub trait TransferPersistence: Send + Sync {
    /// Load every persisted record
    async fn load_transfers(&self) -> Result<Vec<TransferRecord>>;

    /// Insert or replace the given records
    async fn save_transfers(&self, records: &[TransferRecord]) -> Result<()>;

    /// Delete records by id (missing ids are ignored)
    async fn delete_transfers(&self, ids: &[TransferId]) -> Result<()>;

    /// Load every persisted archive key
    async fn load_archive_keys(&self) -> Result<Vec<(String, ArchiveKeyState)>>;

    /// Insert or replace an archive key
    async fn save_archive_key(&self, key: &str, state: ArchiveKeyState) -> Result<()>;

    /// Remove an archive key
    async fn delete_archive_key(&self, key: &str) -> Result<()>;
}

/// Outcome of a status change request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusChange {
    /// Status was updated
    Changed,
    /// Record already had the requested status
    Unchanged,
}

/// In-memory record cache with dirty tracking
#[derive(Debug, Default)]
pub struct TransferStore {
    records: HashMap<TransferId, TransferRecord>,
    /// Admission order; oldest first
    order: Vec<TransferId>,
    dirty: HashSet<TransferId>,
    deleted: HashSet<TransferId>,
    archive_keys: HashMap<String, ArchiveKeyState>,
    dirty_keys: HashSet<String>,
}

impl TransferStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store from persistence
    pub async fn load(persistence: &dyn TransferPersistence) -> Result<Self> {
        let mut records = persistence.load_transfers().await?;
        records.sort_by_key(|r| r.created_at);

        let mut store = Self::new();
        for record in records {
            store.order.push(record.id);
            store.records.insert(record.id, record);
        }
        store.archive_keys = persistence.load_archive_keys().await?.into_iter().collect();

        tracing::info!(
            records = store.records.len(),
            archive_keys = store.archive_keys.len(),
            "Loaded transfer store"
        );
        Ok(store)
    }

    /// Add a new record (replaces a record with the same id)
    pub fn insert(&mut self, record: TransferRecord) {
        let id = record.id;
        if self.records.insert(id, record).is_none() {
            self.order.push(id);
        }
        self.deleted.remove(&id);
        self.dirty.insert(id);
    }

    /// Get a record by id
    pub fn get(&self, id: &TransferId) -> Option<&TransferRecord> {
        self.records.get(id)
    }

    /// Whether a record exists
    pub fn contains(&self, id: &TransferId) -> bool {
        self.records.contains_key(id)
    }

    /// Iterate records in admission order
    pub fn iter(&self) -> impl Iterator<Item = &TransferRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// Ids with the given status, in admission order
    pub fn ids_with_status(&self, status: Status) -> Vec<TransferId> {
        self.iter()
            .filter(|r| r.status == status)
            .map(|r| r.id)
            .collect()
    }

    /// Count records with the given status
    pub fn count_with_status(&self, status: Status) -> usize {
        self.records.values().filter(|r| r.status == status).count()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Mutate a non-terminal record's fields
    ///
    /// Terminal records (completed, error) are frozen; the closure is not run
    /// and `None` is returned. Status changes must go through
    /// [`set_status`](Self::set_status).
    pub fn update<F>(&mut self, id: &TransferId, f: F) -> Option<&TransferRecord>
    where
        F: FnOnce(&mut TransferRecord),
    {
        let record = self.records.get_mut(id)?;
        if record.status.is_terminal() {
            tracing::debug!(transfer_id = %id, status = %record.status, "Ignoring update to terminal record");
            return None;
        }
        let status = record.status;
        f(record);
        record.status = status;
        self.dirty.insert(*id);
        self.records.get(id)
    }

    /// Move a record through the lifecycle state machine
    pub fn set_status(
        &mut self,
        id: &TransferId,
        status: Status,
    ) -> std::result::Result<StatusChange, TransferError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or(TransferError::NotFound { id: *id })?;

        if record.status == status {
            return Ok(StatusChange::Unchanged);
        }
        if !record.status.can_transition_to(status) {
            return Err(TransferError::InvalidTransition {
                id: *id,
                from: record.status,
                to: status,
            });
        }

        let now = chrono::Utc::now().timestamp();
        match status {
            Status::Downloading if record.started_at.is_none() => record.started_at = Some(now),
            Status::Completed => record.completed_at = Some(now),
            _ => {}
        }
        if status != Status::Error {
            record.error = None;
        }
        record.status = status;
        self.dirty.insert(*id);
        Ok(StatusChange::Changed)
    }

    /// Record an error message and move the record to `error`
    pub fn fail(
        &mut self,
        id: &TransferId,
        message: impl Into<String>,
    ) -> std::result::Result<StatusChange, TransferError> {
        let change = self.set_status(id, Status::Error)?;
        if let Some(record) = self.records.get_mut(id) {
            record.error = Some(message.into());
            record.speed_bps = 0.0;
        }
        Ok(change)
    }

    /// Remove a record entirely
    pub fn remove(&mut self, id: &TransferId) -> Option<TransferRecord> {
        let record = self.records.remove(id)?;
        self.order.retain(|other| other != id);
        self.dirty.remove(id);
        self.deleted.insert(*id);
        Some(record)
    }

    /// State of an archive key, if recorded
    pub fn archive_key(&self, key: &str) -> Option<ArchiveKeyState> {
        self.archive_keys.get(key).copied()
    }

    /// Iterate archive keys
    pub fn archive_keys(&self) -> impl Iterator<Item = (&str, ArchiveKeyState)> {
        self.archive_keys.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Record an archive key
    pub fn set_archive_key(&mut self, key: &str, state: ArchiveKeyState) {
        self.archive_keys.insert(key.to_string(), state);
        self.dirty_keys.insert(key.to_string());
    }

    /// Forget an archive key
    pub fn clear_archive_key(&mut self, key: &str) {
        if self.archive_keys.remove(key).is_some() {
            self.dirty_keys.insert(key.to_string());
        }
    }

    /// Whether anything awaits a flush
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || !self.deleted.is_empty() || !self.dirty_keys.is_empty()
    }

    /// Whether archive keys await a flush
    ///
    /// Keys are written as soon as possible after dispatch so a crash cannot
    /// produce a second extraction of the same group.
    pub fn has_pending_archive_keys(&self) -> bool {
        !self.dirty_keys.is_empty()
    }

    /// Write every dirty entry through the persistence port
    ///
    /// On failure the dirty flags are kept so the next flush retries.
    pub async fn flush(&mut self, persistence: &dyn TransferPersistence) -> Result<usize> {
        if !self.is_dirty() {
            return Ok(0);
        }

        let keys: Vec<String> = self.dirty_keys.iter().cloned().collect();
        for key in &keys {
            match self.archive_keys.get(key) {
                Some(state) => persistence.save_archive_key(key, *state).await?,
                None => persistence.delete_archive_key(key).await?,
            }
            self.dirty_keys.remove(key);
        }

        // admission order, so new rows keep the queue order on reload
        let upserts: Vec<TransferRecord> = self
            .iter()
            .filter(|r| self.dirty.contains(&r.id))
            .cloned()
            .collect();
        if !upserts.is_empty() {
            persistence.save_transfers(&upserts).await?;
        }

        let deletes: Vec<TransferId> = self.deleted.iter().copied().collect();
        if !deletes.is_empty() {
            persistence.delete_transfers(&deletes).await?;
        }

        for record in &upserts {
            self.dirty.remove(&record.id);
        }
        for id in &deletes {
            self.deleted.remove(id);
        }

        let written = upserts.len() + deletes.len() + keys.len();
        tracing::debug!(written, "Flushed transfer store");
        Ok(written)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransferKind;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Persistence double that records every write
    #[derive(Default)]
    struct MemoryPersistence {
        records: Mutex<HashMap<TransferId, TransferRecord>>,
        keys: Mutex<HashMap<String, ArchiveKeyState>>,
        fail_saves: bool,
    }

    #[async_trait]
    impl TransferPersistence for MemoryPersistence {
        async fn load_transfers(&self) -> Result<Vec<TransferRecord>> {
            Ok(self.records.lock().unwrap().values().cloned().collect())
        }

        async fn save_transfers(&self, records: &[TransferRecord]) -> Result<()> {
            if self.fail_saves {
                return Err(crate::Error::Other("disk full".into()));
            }
            let mut map = self.records.lock().unwrap();
            for r in records {
                map.insert(r.id, r.clone());
            }
            Ok(())
        }

        async fn delete_transfers(&self, ids: &[TransferId]) -> Result<()> {
            let mut map = self.records.lock().unwrap();
            for id in ids {
                map.remove(id);
            }
            Ok(())
        }

        async fn load_archive_keys(&self) -> Result<Vec<(String, ArchiveKeyState)>> {
            Ok(self
                .keys
                .lock()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect())
        }

        async fn save_archive_key(&self, key: &str, state: ArchiveKeyState) -> Result<()> {
            self.keys.lock().unwrap().insert(key.to_string(), state);
            Ok(())
        }

        async fn delete_archive_key(&self, key: &str) -> Result<()> {
            self.keys.lock().unwrap().remove(key);
            Ok(())
        }
    }

    fn record(filename: &str, created_at: i64) -> TransferRecord {
        TransferRecord {
            id: TransferId::new(),
            kind: TransferKind::Http,
            filename: filename.to_string(),
            source: format!("https://example.com/{filename}"),
            destination: PathBuf::from("/downloads"),
            total_bytes: None,
            transferred_bytes: 0,
            uploaded_bytes: 0,
            status: Status::Pending,
            speed_bps: 0.0,
            group: None,
            extraction: None,
            error: None,
            info_hash: None,
            resume_token: None,
            trackers: vec![],
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn iter_preserves_admission_order() {
        let mut store = TransferStore::new();
        let a = record("a", 1);
        let b = record("b", 2);
        let (ida, idb) = (a.id, b.id);
        store.insert(a);
        store.insert(b);
        let ids: Vec<_> = store.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![ida, idb]);
    }

    #[test]
    fn set_status_enforces_state_machine() {
        let mut store = TransferStore::new();
        let r = record("a", 1);
        let id = r.id;
        store.insert(r);

        assert_eq!(
            store.set_status(&id, Status::Downloading).unwrap(),
            StatusChange::Changed
        );
        assert!(store.get(&id).unwrap().started_at.is_some());
        assert_eq!(
            store.set_status(&id, Status::Downloading).unwrap(),
            StatusChange::Unchanged
        );
        store.set_status(&id, Status::Completed).unwrap();
        let err = store.set_status(&id, Status::Downloading).unwrap_err();
        assert!(matches!(err, TransferError::InvalidTransition { .. }));
    }

    #[test]
    fn terminal_records_are_frozen() {
        let mut store = TransferStore::new();
        let r = record("a", 1);
        let id = r.id;
        store.insert(r);
        store.fail(&id, "boom").unwrap();

        assert!(store.update(&id, |r| r.transferred_bytes = 99).is_none());
        let rec = store.get(&id).unwrap();
        assert_eq!(rec.transferred_bytes, 0);
        assert_eq!(rec.error.as_deref(), Some("boom"));
        assert!(store.set_status(&id, Status::Completed).is_err());
    }

    #[test]
    fn update_cannot_smuggle_status() {
        let mut store = TransferStore::new();
        let r = record("a", 1);
        let id = r.id;
        store.insert(r);
        store.update(&id, |r| r.status = Status::Completed);
        assert_eq!(store.get(&id).unwrap().status, Status::Pending);
    }

    #[tokio::test]
    async fn flush_writes_dirty_and_deleted_entries() {
        let persistence = MemoryPersistence::default();
        let mut store = TransferStore::new();
        let a = record("a", 1);
        let b = record("b", 2);
        let (ida, idb) = (a.id, b.id);
        store.insert(a);
        store.insert(b);
        store.set_archive_key("file:/downloads/x.zip", ArchiveKeyState::Done);

        assert_eq!(store.flush(&persistence).await.unwrap(), 3);
        assert!(!store.is_dirty());
        assert_eq!(persistence.records.lock().unwrap().len(), 2);

        store.remove(&ida);
        store.update(&idb, |r| r.transferred_bytes = 10);
        store.flush(&persistence).await.unwrap();

        let saved = persistence.records.lock().unwrap();
        assert!(!saved.contains_key(&ida));
        assert_eq!(saved[&idb].transferred_bytes, 10);
        assert_eq!(
            persistence.keys.lock().unwrap()["file:/downloads/x.zip"],
            ArchiveKeyState::Done
        );
    }

    #[tokio::test]
    async fn failed_flush_keeps_dirty_flags() {
        let persistence = MemoryPersistence {
            fail_saves: true,
            ..Default::default()
        };
        let mut store = TransferStore::new();
        store.insert(record("a", 1));
        assert!(store.flush(&persistence).await.is_err());
        assert!(store.is_dirty());
    }

    #[tokio::test]
    async fn load_restores_records_and_keys() {
        let persistence = MemoryPersistence::default();
        let mut store = TransferStore::new();
        let late = record("late", 20);
        let early = record("early", 10);
        let early_id = early.id;
        store.insert(late);
        store.insert(early);
        store.set_archive_key("group:/downloads/movie", ArchiveKeyState::InFlight);
        store.flush(&persistence).await.unwrap();

        let loaded = TransferStore::load(&persistence).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.iter().next().unwrap().id, early_id);
        assert_eq!(
            loaded.archive_key("group:/downloads/movie"),
            Some(ArchiveKeyState::InFlight)
        );
        assert!(!loaded.is_dirty());
    }
}

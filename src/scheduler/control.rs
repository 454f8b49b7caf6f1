//! Admission and user commands.

use std::path::Path;

use super::Scheduler;
use crate::archive::group_key_for;
use crate::engine::EngineCommand;
use crate::error::{Error, Result, TransferError};
use crate::types::{Event, NewTransfer, Status, TransferId, TransferKind, TransferRecord};

impl Scheduler {
    /// Admit a new transfer as `pending` and run a scheduling pass
    pub fn admit(&mut self, request: NewTransfer) -> Result<TransferId> {
        let source = request.source.trim().to_string();
        if source.is_empty() {
            return Err(Error::InvalidSource("empty source".to_string()));
        }
        let kind = request
            .kind
            .unwrap_or_else(|| TransferKind::detect(&source));
        if kind == TransferKind::Http {
            let url = url::Url::parse(&source)
                .map_err(|e| Error::InvalidSource(format!("{}: {}", source, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::InvalidSource(format!(
                    "unsupported scheme '{}' in {}",
                    url.scheme(),
                    source
                )));
            }
        }

        let destination = request
            .destination
            .unwrap_or_else(|| self.settings.download_dir.clone());
        let filename = request
            .filename
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| filename_for(&source, kind));

        let mut trackers = Vec::new();
        if kind == TransferKind::Torrent {
            for tracker in request
                .trackers
                .iter()
                .chain(self.settings.default_trackers.iter())
            {
                if !trackers.contains(tracker) {
                    trackers.push(tracker.clone());
                }
            }
        }

        let id = TransferId::new();
        let record = TransferRecord {
            id,
            kind,
            group: group_key_for(&destination, &filename),
            filename: filename.clone(),
            source,
            destination,
            total_bytes: request.total_bytes,
            transferred_bytes: 0,
            uploaded_bytes: 0,
            status: Status::Pending,
            speed_bps: 0.0,
            extraction: None,
            error: None,
            info_hash: None,
            resume_token: None,
            trackers,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
        };
        self.store.insert(record);

        tracing::info!(transfer_id = %id, kind = kind.as_str(), filename = %filename, "Transfer admitted");
        self.emit(Event::Added { id, filename, kind });
        self.schedule_pass();
        Ok(id)
    }

    /// Pause a transfer
    ///
    /// User pauses are never undone by the scheduler; only [`resume`](Self::resume)
    /// brings the transfer back.
    pub fn pause(&mut self, id: &TransferId) -> Result<()> {
        let (kind, status) = {
            let record = self.require(id)?;
            (record.kind, record.status)
        };
        match status {
            Status::Paused => {
                // a user pause overrides an earlier budget pause
                self.paused_by_scheduler.remove(id);
                Ok(())
            }
            Status::Pending => {
                self.set_status_logged(id, Status::Paused);
                Ok(())
            }
            Status::Downloading => {
                self.store.set_status(id, Status::Paused)?;
                self.store.update(id, |r| r.speed_bps = 0.0);
                self.running.remove(id);
                self.paused_by_scheduler.remove(id);
                tracing::info!(transfer_id = %id, "Transfer paused");
                self.emit_status(id, Status::Paused);
                self.commands
                    .dispatch(EngineCommand::Pause { id: *id, kind });
                self.schedule_pass();
                Ok(())
            }
            current => Err(invalid_state(id, "pause", current)),
        }
    }

    /// Resume a paused transfer
    ///
    /// The transfer re-enters the queue as `pending` and runs when the budget
    /// allows.
    pub fn resume(&mut self, id: &TransferId) -> Result<()> {
        let status = self.require(id)?.status;
        match status {
            Status::Paused => {
                self.store.set_status(id, Status::Pending)?;
                self.paused_by_scheduler.remove(id);
                tracing::info!(transfer_id = %id, "Transfer resumed");
                self.emit_status(id, Status::Pending);
                self.schedule_pass();
                Ok(())
            }
            Status::Pending | Status::Downloading => Ok(()),
            current => Err(invalid_state(id, "resume", current)),
        }
    }

    /// Cancel a transfer and drop its partial data
    ///
    /// `cancelled` is terminal and the record is removed right away.
    pub fn cancel(&mut self, id: &TransferId) -> Result<()> {
        let (kind, status, path) = {
            let record = self.require(id)?;
            (record.kind, record.status, record.file_path())
        };
        match status {
            Status::Pending | Status::Downloading | Status::Paused => {}
            current => return Err(invalid_state(id, "cancel", current)),
        }

        let was_attached = self.attached.contains(id);
        self.store.set_status(id, Status::Cancelled)?;
        self.emit_status(id, Status::Cancelled);
        self.store.remove(id);
        self.release(id);

        if was_attached || kind == TransferKind::Torrent {
            self.commands.dispatch(EngineCommand::Cancel {
                id: *id,
                kind,
                delete_files: true,
                path,
            });
        }

        tracing::info!(transfer_id = %id, "Transfer cancelled");
        self.emit(Event::Removed { id: *id });
        self.schedule_pass();
        Ok(())
    }

    /// Remove a record, optionally deleting its files
    ///
    /// Active transfers are torn down first. Records that are extracting
    /// cannot be removed until the job reports back. For an extracted
    /// archive the files are the extraction folder.
    pub fn remove(&mut self, id: &TransferId, delete_files: bool) -> Result<()> {
        let (kind, status, path) = {
            let record = self.require(id)?;
            let path = if record.extraction.as_deref() == Some("extracted") {
                record.destination.clone()
            } else {
                record.file_path()
            };
            (record.kind, record.status, path)
        };
        if status == Status::Extracting {
            return Err(invalid_state(id, "remove", status));
        }

        let was_attached = self.attached.contains(id);
        self.store.remove(id);
        self.release(id);

        match kind {
            TransferKind::Torrent => self.commands.dispatch(EngineCommand::Cancel {
                id: *id,
                kind,
                delete_files,
                path,
            }),
            TransferKind::Http if was_attached && !status.is_terminal() => {
                self.commands.dispatch(EngineCommand::Cancel {
                    id: *id,
                    kind,
                    delete_files,
                    path,
                })
            }
            TransferKind::Http if delete_files => {
                self.commands.dispatch(EngineCommand::DeleteFiles(vec![path]))
            }
            TransferKind::Http => {}
        }

        tracing::info!(transfer_id = %id, delete_files, "Transfer removed");
        self.emit(Event::Removed { id: *id });
        if status == Status::Downloading {
            self.schedule_pass();
        }
        Ok(())
    }

    /// Change the concurrency budget at runtime
    ///
    /// Lowering it pauses the most recently started transfers immediately.
    pub fn set_max_concurrent(&mut self, max: usize) -> Result<()> {
        if max == 0 {
            return Err(Error::Config {
                message: "max_concurrent_downloads must be at least 1".to_string(),
                key: Some("max_concurrent_downloads".to_string()),
            });
        }
        self.settings.max_concurrent = max;
        tracing::info!(max_concurrent = max, "Concurrency budget changed");
        self.emit(Event::ConcurrencyChanged {
            max_concurrent: max,
        });
        self.schedule_pass();
        Ok(())
    }

    fn require(&self, id: &TransferId) -> Result<&TransferRecord> {
        self.store
            .get(id)
            .ok_or_else(|| TransferError::NotFound { id: *id }.into())
    }
}

fn invalid_state(id: &TransferId, operation: &'static str, current: Status) -> Error {
    TransferError::InvalidState {
        id: *id,
        operation,
        current,
    }
    .into()
}

/// Best-effort file name for a source locator
///
/// Magnet links use their `dn` parameter (or the info hash), URLs their last
/// path segment and local torrent files their stem.
pub(crate) fn filename_for(source: &str, kind: TransferKind) -> String {
    if let Ok(url) = url::Url::parse(source) {
        if url.scheme() == "magnet" {
            let mut hash = None;
            for (key, value) in url.query_pairs() {
                match key.as_ref() {
                    "dn" if !value.is_empty() => return value.into_owned(),
                    "xt" => hash = value.rsplit(':').next().map(str::to_string),
                    _ => {}
                }
            }
            if let Some(hash) = hash.filter(|h| !h.is_empty()) {
                return hash;
            }
        } else if matches!(url.scheme(), "http" | "https") {
            return url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|s| !s.is_empty())
                .map(|s| strip_torrent_suffix(s, kind))
                .unwrap_or_else(|| "download".to_string());
        }
    }

    Path::new(source)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(|n| strip_torrent_suffix(n, kind))
        .unwrap_or_else(|| "download".to_string())
}

fn strip_torrent_suffix(name: &str, kind: TransferKind) -> String {
    if kind == TransferKind::Torrent
        && name.len() > ".torrent".len()
        && name.to_ascii_lowercase().ends_with(".torrent")
    {
        name[..name.len() - ".torrent".len()].to_string()
    } else {
        name.to_string()
    }
}

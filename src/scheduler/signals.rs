//! Engine signals and extraction results.

use std::path::PathBuf;

use tokio::time::Instant;

use super::Scheduler;
use crate::archive::{Decision, ExtractionJob, group_key_for};
use crate::engine::{EngineCommand, EngineSignal, EngineState, FinishOutcome};
use crate::types::{Event, Status, TransferId, TransferKind};
use crate::worker::WorkerKind;

impl Scheduler {
    /// Apply one engine or worker signal
    ///
    /// Signals about unknown or removed transfers are ignored; so are repeated
    /// terminal signals.
    pub fn handle_signal(&mut self, signal: EngineSignal) {
        match signal {
            EngineSignal::Started { id, total_bytes } => {
                if let Some(total) = total_bytes {
                    self.store.update(&id, |r| r.total_bytes = Some(total));
                }
                if let Some(run) = self.running.get_mut(&id) {
                    run.last_progress_at = Instant::now();
                    run.engine_state = EngineState::Progressing;
                }
            }
            EngineSignal::Progress {
                id,
                transferred_bytes,
                total_bytes,
                uploaded_bytes,
                state,
                can_resume,
            } => self.on_progress(
                id,
                transferred_bytes,
                total_bytes,
                uploaded_bytes,
                state,
                can_resume,
            ),
            EngineSignal::Metadata {
                id,
                name,
                total_bytes,
                info_hash,
            } => {
                let updated = self.store.update(&id, |r| {
                    r.filename = name.clone();
                    r.total_bytes = Some(total_bytes);
                    r.info_hash = Some(info_hash.clone());
                    r.group = group_key_for(&r.destination, &name);
                });
                if updated.is_some() {
                    tracing::info!(transfer_id = %id, name = %name, total_bytes, "Metadata received");
                    self.emit(Event::Metadata {
                        id,
                        name,
                        total_bytes: Some(total_bytes),
                        info_hash: Some(info_hash),
                    });
                }
            }
            EngineSignal::ResumeToken { id, token } => {
                self.store.update(&id, |r| r.resume_token = Some(token));
            }
            EngineSignal::Finished { id, outcome } => match outcome {
                FinishOutcome::Completed { path } => self.on_completed(id, path),
                FinishOutcome::Failed(error) => self.on_failed(id, error),
                FinishOutcome::Cancelled => self.on_engine_cancelled(id),
            },
            EngineSignal::ExtractionProgress { key, percent } => {
                self.on_extraction_progress(&key, percent)
            }
            EngineSignal::ExtractionFinished { key, result } => {
                self.on_extraction_finished(&key, result)
            }
            EngineSignal::WorkerExited { worker } => self.on_worker_exited(worker),
        }
    }

    fn on_progress(
        &mut self,
        id: TransferId,
        transferred_bytes: u64,
        total_bytes: Option<u64>,
        uploaded_bytes: u64,
        state: EngineState,
        can_resume: bool,
    ) {
        let Some(record) = self.store.get(&id) else {
            return;
        };
        if record.status.is_terminal() {
            return;
        }
        let downloading = record.status == Status::Downloading;
        let now = Instant::now();

        self.resumable.insert(id, can_resume);
        let speed = if downloading {
            self.speed.update(id, transferred_bytes, now.into_std())
        } else {
            0.0
        };
        if let Some(run) = self.running.get_mut(&id) {
            if transferred_bytes > run.last_bytes {
                run.last_bytes = transferred_bytes;
                run.last_progress_at = now;
            }
            run.engine_state = state;
        }

        let Some(record) = self.store.update(&id, |r| {
            r.transferred_bytes = transferred_bytes;
            r.uploaded_bytes = uploaded_bytes;
            if total_bytes.is_some() {
                r.total_bytes = total_bytes;
            }
            r.speed_bps = speed;
        }) else {
            return;
        };

        let event = Event::Progress {
            id,
            transferred_bytes: record.transferred_bytes,
            total_bytes: record.total_bytes,
            uploaded_bytes: record.uploaded_bytes,
            speed_bps: record.speed_bps,
            percent: record.percent(),
        };
        self.emit(event);
    }

    fn on_completed(&mut self, id: TransferId, path: Option<PathBuf>) {
        let Some(status) = self.store.get(&id).map(|r| r.status) else {
            return;
        };
        match status {
            Status::Downloading => {}
            Status::Pending | Status::Paused => {
                // finished while a pause was in flight
                self.set_status_logged(&id, Status::Downloading);
            }
            _ => {
                tracing::debug!(transfer_id = %id, status = %status, "Ignoring duplicate completion");
                return;
            }
        }

        self.store.update(&id, |r| {
            if let Some(path) = &path
                && let (Some(parent), Some(name)) = (path.parent(), path.file_name())
            {
                r.destination = parent.to_path_buf();
                r.filename = name.to_string_lossy().into_owned();
                r.group = group_key_for(&r.destination, &r.filename);
            }
            if let Some(total) = r.total_bytes {
                r.transferred_bytes = r.transferred_bytes.max(total);
            }
            r.speed_bps = 0.0;
            r.resume_token = None;
        });
        if !self.set_status_logged(&id, Status::Completed) {
            return;
        }
        self.release(&id);
        tracing::info!(transfer_id = %id, "Transfer completed");

        if self.settings.auto_extract {
            match self.coalescer.on_completed(&mut self.store, &id) {
                Decision::Dispatch(job) => self.start_extraction(job),
                Decision::Waiting { .. } | Decision::Duplicate | Decision::NotArchive => {
                    self.emit_completed(&id)
                }
            }
        } else {
            self.emit_completed(&id);
        }
        self.schedule_pass();
    }

    fn on_failed(&mut self, id: TransferId, error: String) {
        let Some(record) = self.store.get(&id) else {
            return;
        };
        if record.status.is_terminal() {
            tracing::debug!(transfer_id = %id, "Ignoring failure for finished transfer");
            return;
        }
        let was_running = record.status == Status::Downloading;

        match self.store.fail(&id, error.clone()) {
            Ok(_) => {
                self.release(&id);
                tracing::warn!(transfer_id = %id, error = %error, "Transfer failed");
                self.emit_status(&id, Status::Error);
                self.emit(Event::Failed { id, error });
                if was_running {
                    self.schedule_pass();
                }
            }
            Err(e) => tracing::warn!(transfer_id = %id, error = %e, "Cannot record failure"),
        }
    }

    fn on_engine_cancelled(&mut self, id: TransferId) {
        let Some(record) = self.store.get(&id) else {
            return;
        };
        if record.status.is_terminal() || record.status == Status::Extracting {
            return;
        }
        if self.set_status_logged(&id, Status::Cancelled) {
            self.store.remove(&id);
            self.release(&id);
            tracing::info!(transfer_id = %id, "Transfer cancelled by engine");
            self.emit(Event::Removed { id });
            self.schedule_pass();
        }
    }

    /// Move the job's members to `extracting` and hand the job to the worker
    pub(super) fn start_extraction(&mut self, job: ExtractionJob) {
        for member in &job.members {
            if self.set_status_logged(member, Status::Extracting) {
                self.store
                    .update(member, |r| r.extraction = Some("queued".to_string()));
            }
        }
        self.commands.dispatch(EngineCommand::Extract(job));
    }

    fn on_extraction_progress(&mut self, key: &str, percent: f32) {
        let Some(job) = self.coalescer.job(key) else {
            return;
        };
        let members = job.members.clone();
        for id in members {
            let updated = self.store.update(&id, |r| {
                r.extraction = Some(format!("extracting {:.0}%", percent));
            });
            if updated.is_some() {
                self.emit(Event::Extracting { id, percent });
            }
        }
    }

    fn on_extraction_finished(&mut self, key: &str, result: Result<PathBuf, String>) {
        let Some(job) = self.coalescer.finish(&mut self.store, key, result.is_ok()) else {
            tracing::debug!(key, "Ignoring result for unknown extraction job");
            return;
        };

        match result {
            Ok(extract_dir) => {
                for id in &job.members {
                    let updated = self.store.update(id, |r| {
                        r.destination = extract_dir.clone();
                        r.extraction = Some("extracted".to_string());
                    });
                    if updated.is_none() {
                        continue;
                    }
                    if self.set_status_logged(id, Status::Completed) {
                        self.emit(Event::Completed {
                            id: *id,
                            path: extract_dir.clone(),
                        });
                    }
                }
                tracing::info!(key, dir = ?extract_dir, members = job.members.len(), "Extraction finished");
                if job.delete_after {
                    self.commands
                        .dispatch(EngineCommand::DeleteFiles(job.files.clone()));
                }
            }
            Err(error) => {
                let message = format!("extraction failed: {}", error);
                for id in &job.members {
                    self.store
                        .update(id, |r| r.extraction = Some("failed".to_string()));
                    if let Ok(crate::store::StatusChange::Changed) = self.store.fail(id, &message) {
                        self.emit_status(id, Status::Error);
                        self.emit(Event::Failed {
                            id: *id,
                            error: message.clone(),
                        });
                    }
                }
                tracing::warn!(key, error = %error, "Extraction failed; archive files kept");
            }
        }
    }

    fn on_worker_exited(&mut self, worker: WorkerKind) {
        tracing::warn!(worker = %worker, "Worker exited");
        self.emit(Event::WorkerExited {
            worker: worker.to_string(),
        });
        if worker != WorkerKind::TorrentEngine {
            return;
        }

        // sessions died with the worker; promotion re-adds them
        let torrents: Vec<TransferId> = self
            .store
            .iter()
            .filter(|r| r.kind == TransferKind::Torrent && r.status == Status::Downloading)
            .map(|r| r.id)
            .collect();
        for id in torrents {
            if self.set_status_logged(&id, Status::Paused) {
                self.store.update(&id, |r| r.speed_bps = 0.0);
                self.running.remove(&id);
                self.paused_by_scheduler.insert(id);
                self.resumable.insert(id, true);
            }
        }
        let store = &self.store;
        self.attached
            .retain(|id| store.get(id).is_none_or(|r| r.kind != TransferKind::Torrent));
        self.schedule_pass();
    }

    fn emit_completed(&self, id: &TransferId) {
        if let Some(record) = self.store.get(id) {
            self.emit(Event::Completed {
                id: *id,
                path: record.file_path(),
            });
        }
    }
}

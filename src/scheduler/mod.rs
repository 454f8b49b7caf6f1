//! Transfer queue scheduler
//!
//! The [`Scheduler`] is the single writer of the [`TransferStore`]. It owns
//! admission control, reacts to engine signals, runs the health check and
//! decides when archives extract. It never waits on an engine: every engine
//! interaction is an [`EngineCommand`] handed to a [`CommandSink`], and every
//! observed change is broadcast as an [`Event`].
//!
//! Operations are split by concern:
//! - [`control`] - admission and user commands (pause/resume/cancel/remove)
//! - [`signals`] - engine and worker signals, extraction results
//! - [`health`] - stall detection, automatic resume, restart recovery

mod control;
mod health;
mod signals;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::archive::ArchiveCoalescer;
use crate::config::Config;
use crate::engine::{CommandSink, EngineCommand, EngineState, TransferTarget};
use crate::speed::SpeedEstimator;
use crate::store::{StatusChange, TransferStore};
use crate::types::{Event, Status, TransferId, TransferKind, TransferRecord};

/// Scheduler tunables
#[derive(Clone, Debug)]
pub struct SchedulerSettings {
    /// Maximum number of `downloading` records
    pub max_concurrent: usize,
    /// No forward progress for longer than this triggers a restart
    pub stall_threshold: Duration,
    /// Extract completed archives
    pub auto_extract: bool,
    /// Delete archive files after a successful extraction
    pub delete_archives_after_extract: bool,
    /// Destination for transfers that do not name one
    pub download_dir: PathBuf,
    /// Trackers appended to every torrent
    pub default_trackers: Vec<String>,
}

impl SchedulerSettings {
    /// Derive settings from the manager configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent: config.download.max_concurrent_downloads,
            stall_threshold: config.download.stall_threshold,
            auto_extract: config.extraction.auto_extract,
            delete_archives_after_extract: config.extraction.delete_archives_after_extract,
            download_dir: config.download.download_dir.clone(),
            default_trackers: config.torrent.default_trackers.clone(),
        }
    }
}

/// Liveness bookkeeping for a `downloading` record
#[derive(Clone, Copy, Debug)]
struct RunState {
    /// Promotion sequence number; larger started more recently
    started_seq: u64,
    last_bytes: u64,
    last_progress_at: Instant,
    engine_state: EngineState,
}

/// Admission-controlled scheduler over the transfer store
pub struct Scheduler {
    store: TransferStore,
    coalescer: ArchiveCoalescer,
    speed: SpeedEstimator,
    settings: SchedulerSettings,
    commands: Arc<dyn CommandSink>,
    events: broadcast::Sender<Event>,
    running: HashMap<TransferId, RunState>,
    /// Last `can_resume` reported by the engine
    resumable: HashMap<TransferId, bool>,
    /// Paused by the budget correction (not by the user)
    paused_by_scheduler: HashSet<TransferId>,
    /// Transfers the engines were started for in this process
    attached: HashSet<TransferId>,
    next_seq: u64,
}

impl Scheduler {
    /// Create a scheduler over a loaded store
    pub fn new(
        store: TransferStore,
        settings: SchedulerSettings,
        commands: Arc<dyn CommandSink>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        let coalescer = ArchiveCoalescer::new(settings.delete_archives_after_extract);
        Self {
            store,
            coalescer,
            speed: SpeedEstimator::new(),
            settings,
            commands,
            events,
            running: HashMap::new(),
            resumable: HashMap::new(),
            paused_by_scheduler: HashSet::new(),
            attached: HashSet::new(),
            next_seq: 0,
        }
    }

    /// The record store
    pub fn store(&self) -> &TransferStore {
        &self.store
    }

    /// Mutable access for flushing
    pub fn store_mut(&mut self) -> &mut TransferStore {
        &mut self.store
    }

    /// Get a record by id
    pub fn get(&self, id: &TransferId) -> Option<&TransferRecord> {
        self.store.get(id)
    }

    /// Snapshot of every record in admission order
    pub fn list(&self) -> Vec<TransferRecord> {
        self.store.iter().cloned().collect()
    }

    /// Number of `downloading` records
    pub fn running_count(&self) -> usize {
        self.store.count_with_status(Status::Downloading)
    }

    /// Current concurrency budget
    pub fn max_concurrent(&self) -> usize {
        self.settings.max_concurrent
    }

    /// Number of extraction jobs awaiting a result
    pub fn extractions_in_flight(&self) -> usize {
        self.coalescer.in_flight_len()
    }

    /// Bring the `downloading` count to the budget
    ///
    /// Over budget, the most recently started transfers are paused first.
    /// Under budget, transfers paused by an earlier correction resume first
    /// (oldest first), then the oldest `pending` record is promoted.
    pub fn schedule_pass(&mut self) {
        let max = self.settings.max_concurrent;

        let mut running: Vec<(u64, TransferId)> = self
            .store
            .ids_with_status(Status::Downloading)
            .into_iter()
            .map(|id| {
                let seq = self.running.get(&id).map(|r| r.started_seq).unwrap_or(0);
                (seq, id)
            })
            .collect();

        if running.len() > max {
            running.sort_by(|a, b| b.0.cmp(&a.0));
            let excess = running.len() - max;
            for (_, id) in running.into_iter().take(excess) {
                self.pause_for_budget(&id);
            }
            return;
        }

        let mut count = running.len();
        while count < max {
            let Some(id) = self.next_candidate() else {
                break;
            };
            if !self.promote(&id) {
                break;
            }
            count += 1;
        }
    }

    /// Next record to run: budget-paused resumable transfers first, then pending
    fn next_candidate(&self) -> Option<TransferId> {
        let resumed = self.store.iter().find(|r| {
            r.status == Status::Paused
                && self.paused_by_scheduler.contains(&r.id)
                && self.resumable.get(&r.id).copied().unwrap_or(false)
        });
        resumed
            .or_else(|| self.store.iter().find(|r| r.status == Status::Pending))
            .map(|r| r.id)
    }

    /// Move a record to `downloading` and tell its engine
    fn promote(&mut self, id: &TransferId) -> bool {
        let Some(record) = self.store.get(id) else {
            return false;
        };
        let target = TransferTarget::from(record);
        let command = if self.attached.contains(id) {
            EngineCommand::Resume(target)
        } else {
            match (&record.kind, &record.resume_token) {
                (TransferKind::Http, Some(token)) => EngineCommand::Restore {
                    target,
                    token: token.clone(),
                },
                _ => EngineCommand::Start(target),
            }
        };

        if let Err(e) = self.store.set_status(id, Status::Downloading) {
            tracing::error!(transfer_id = %id, error = %e, "Cannot promote transfer");
            return false;
        }

        self.paused_by_scheduler.remove(id);
        self.attached.insert(*id);
        self.next_seq += 1;
        let transferred = self.store.get(id).map(|r| r.transferred_bytes).unwrap_or(0);
        self.running.insert(
            *id,
            RunState {
                started_seq: self.next_seq,
                last_bytes: transferred,
                last_progress_at: Instant::now(),
                engine_state: EngineState::Progressing,
            },
        );

        tracing::info!(transfer_id = %id, command = command_name(&command), "Promoting transfer");
        self.emit_status(id, Status::Downloading);
        self.commands.dispatch(command);
        true
    }

    /// Pause a running transfer to honour the budget
    ///
    /// Engines that cannot resume are re-queued as `pending` so they restart
    /// cleanly when a slot frees up.
    fn pause_for_budget(&mut self, id: &TransferId) {
        let Some(record) = self.store.get(id) else {
            return;
        };
        let kind = record.kind;
        let resumable = kind == TransferKind::Torrent
            || self.resumable.get(id).copied().unwrap_or(false);
        let next = if resumable {
            Status::Paused
        } else {
            Status::Pending
        };

        if let Err(e) = self.store.set_status(id, next) {
            tracing::error!(transfer_id = %id, error = %e, "Cannot pause transfer for budget");
            return;
        }
        self.store.update(id, |r| r.speed_bps = 0.0);
        self.running.remove(id);
        if resumable {
            self.paused_by_scheduler.insert(*id);
            self.resumable.insert(*id, true);
        } else {
            self.attached.remove(id);
        }

        tracing::info!(transfer_id = %id, status = %next, "Over concurrency budget; pausing most recent transfer");
        self.emit_status(id, next);
        let command = if resumable {
            EngineCommand::Pause { id: *id, kind }
        } else {
            EngineCommand::Cancel {
                id: *id,
                kind,
                delete_files: false,
                path: self.store.get(id).map(|r| r.file_path()).unwrap_or_default(),
            }
        };
        self.commands.dispatch(command);
    }

    /// Forget per-transfer runtime state once a record leaves the active set
    fn release(&mut self, id: &TransferId) {
        self.speed.cleanup(id);
        self.running.remove(id);
        self.resumable.remove(id);
        self.paused_by_scheduler.remove(id);
        self.attached.remove(id);
    }

    fn set_status_logged(&mut self, id: &TransferId, status: Status) -> bool {
        match self.store.set_status(id, status) {
            Ok(StatusChange::Changed) => {
                self.emit_status(id, status);
                true
            }
            Ok(StatusChange::Unchanged) => false,
            Err(e) => {
                tracing::warn!(transfer_id = %id, error = %e, "Rejected status change");
                false
            }
        }
    }

    fn emit_status(&self, id: &TransferId, status: Status) {
        self.emit(Event::StatusChanged { id: *id, status });
    }

    fn emit(&self, event: Event) {
        // send() fails only when nobody is subscribed
        self.events.send(event).ok();
    }
}

fn command_name(command: &EngineCommand) -> &'static str {
    match command {
        EngineCommand::Start(_) => "start",
        EngineCommand::Resume(_) => "resume",
        EngineCommand::Restore { .. } => "restore",
        EngineCommand::Pause { .. } => "pause",
        EngineCommand::Cancel { .. } => "cancel",
        EngineCommand::Extract(_) => "extract",
        EngineCommand::DeleteFiles(_) => "delete-files",
    }
}

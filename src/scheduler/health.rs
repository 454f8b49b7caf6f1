//! Stall detection, automatic resume and restart recovery.

use tokio::time::Instant;

use super::Scheduler;
use crate::engine::{EngineCommand, EngineState, TransferTarget};
use crate::types::{Status, TransferId};

impl Scheduler {
    /// Periodic liveness check over every `downloading` record
    ///
    /// Interrupted downloads whose engine can resume are resumed in place.
    /// Downloads without forward progress for longer than the stall threshold
    /// are restarted (pause then resume) without a status change.
    pub fn health_check(&mut self) {
        let now = Instant::now();
        let threshold = self.settings.stall_threshold;
        let mut interrupted = Vec::new();
        let mut stalled = Vec::new();

        for id in self.store.ids_with_status(Status::Downloading) {
            let Some(run) = self.running.get(&id) else {
                continue;
            };
            let can_resume = self.resumable.get(&id).copied().unwrap_or(false);
            if run.engine_state == EngineState::Interrupted && can_resume {
                interrupted.push(id);
            } else if now.saturating_duration_since(run.last_progress_at) > threshold {
                stalled.push(id);
            }
        }

        for id in interrupted {
            tracing::info!(transfer_id = %id, "Resuming interrupted download");
            self.restart(&id, false);
        }
        for id in stalled {
            tracing::warn!(
                transfer_id = %id,
                threshold_secs = threshold.as_secs(),
                "No progress within stall threshold; restarting transfer"
            );
            self.restart(&id, true);
        }
    }

    /// Reconcile a freshly loaded store with the engines
    ///
    /// Nothing is attached after a restart: `downloading` records re-enter the
    /// queue, interrupted extractions are dispatched again and extractions
    /// without a job are failed.
    pub fn restore_after_restart(&mut self) {
        for id in self.store.ids_with_status(Status::Downloading) {
            if self.set_status_logged(&id, Status::Pending) {
                self.store.update(&id, |r| r.speed_bps = 0.0);
            }
        }

        let jobs = self.coalescer.resume_in_flight(&mut self.store);
        let mut dispatched: Vec<TransferId> = Vec::new();
        for job in jobs {
            dispatched.extend(job.members.iter().copied());
            self.commands.dispatch(EngineCommand::Extract(job));
        }

        for id in self.store.ids_with_status(Status::Extracting) {
            if dispatched.contains(&id) {
                continue;
            }
            match self.store.fail(&id, "extraction interrupted") {
                Ok(_) => {
                    tracing::warn!(transfer_id = %id, "Extraction interrupted by restart");
                    self.emit_status(&id, Status::Error);
                }
                Err(e) => tracing::warn!(transfer_id = %id, error = %e, "Cannot fail interrupted extraction"),
            }
        }

        tracing::info!(
            records = self.store.len(),
            pending = self.store.count_with_status(Status::Pending),
            extracting = dispatched.len(),
            "Restored transfer queue"
        );
        self.schedule_pass();
    }

    fn restart(&mut self, id: &TransferId, pause_first: bool) {
        let Some(record) = self.store.get(id) else {
            return;
        };
        let target = TransferTarget::from(record);
        if pause_first {
            self.commands.dispatch(EngineCommand::Pause {
                id: *id,
                kind: target.kind,
            });
        }
        self.commands.dispatch(EngineCommand::Resume(target));
        self.speed.cleanup(id);
        if let Some(run) = self.running.get_mut(id) {
            run.last_progress_at = Instant::now();
            run.engine_state = EngineState::Progressing;
        }
    }
}

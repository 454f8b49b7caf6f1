use super::*;
use std::sync::Mutex;

use super::control::filename_for;

use crate::archive::{ArchiveKeyState, archive_key_for};
use crate::engine::{EngineSignal, FinishOutcome};
use crate::error::{Error, TransferError};
use crate::types::NewTransfer;
use crate::worker::WorkerKind;


#[derive(Default)]
struct RecordingSink {
    commands: Mutex<Vec<EngineCommand>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<EngineCommand> {
        std::mem::take(&mut *self.commands.lock().unwrap())
    }
}

impl CommandSink for RecordingSink {
    fn dispatch(&self, command: EngineCommand) {
        self.commands.lock().unwrap().push(command);
    }
}

fn settings(max_concurrent: usize) -> SchedulerSettings {
    SchedulerSettings {
        max_concurrent,
        stall_threshold: Duration::from_secs(30),
        auto_extract: true,
        delete_archives_after_extract: false,
        download_dir: PathBuf::from("/downloads"),
        default_trackers: vec!["udp://tracker.example:1337".to_string()],
    }
}

struct Harness {
    scheduler: Scheduler,
    sink: Arc<RecordingSink>,
    events: broadcast::Receiver<Event>,
}

impl Harness {
    fn with_settings(settings: SchedulerSettings) -> Self {
        Self::with_store(TransferStore::new(), settings)
    }

    fn with_store(store: TransferStore, settings: SchedulerSettings) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let (tx, events) = broadcast::channel(1024);
        let scheduler = Scheduler::new(store, settings, sink.clone(), tx);
        Self {
            scheduler,
            sink,
            events,
        }
    }

    fn new(max_concurrent: usize) -> Self {
        Self::with_settings(settings(max_concurrent))
    }

    fn add(&mut self, name: &str) -> TransferId {
        self.scheduler
            .admit(NewTransfer {
                source: format!("https://files.example/{name}"),
                ..Default::default()
            })
            .unwrap()
    }

    fn status(&self, id: &TransferId) -> Status {
        self.scheduler.get(id).unwrap().status
    }

    fn progress(&mut self, id: TransferId, bytes: u64, state: EngineState, can_resume: bool) {
        self.scheduler.handle_signal(EngineSignal::Progress {
            id,
            transferred_bytes: bytes,
            total_bytes: Some(1_000),
            uploaded_bytes: 0,
            state,
            can_resume,
        });
    }

    fn complete(&mut self, id: TransferId) {
        self.scheduler.handle_signal(EngineSignal::Finished {
            id,
            outcome: FinishOutcome::Completed { path: None },
        });
    }

    fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn started_ids(commands: &[EngineCommand]) -> Vec<TransferId> {
    commands
        .iter()
        .filter_map(|c| match c {
            EngineCommand::Start(target) | EngineCommand::Resume(target) => Some(target.id),
            EngineCommand::Restore { target, .. } => Some(target.id),
            _ => None,
        })
        .collect()
}

fn record(name: &str, status: Status) -> TransferRecord {
    let destination = PathBuf::from("/downloads");
    TransferRecord {
        id: TransferId::new(),
        kind: TransferKind::Http,
        group: crate::archive::group_key_for(&destination, name),
        filename: name.to_string(),
        source: format!("https://files.example/{name}"),
        destination,
        total_bytes: Some(1_000),
        transferred_bytes: 0,
        uploaded_bytes: 0,
        status,
        speed_bps: 0.0,
        extraction: None,
        error: None,
        info_hash: None,
        resume_token: None,
        trackers: Vec::new(),
        created_at: 0,
        started_at: None,
        completed_at: None,
    }
}

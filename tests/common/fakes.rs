//! Fake engines and workers driven by hand from tests

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use transfer_dl::engine::{DownloadEngine, EngineSignal, FinishOutcome, SignalSink, TransferTarget};
use transfer_dl::extraction::{ExtractResult, ExtractStatus, ExtractionCommand};
use transfer_dl::torrent::{
    OpenedSession, PeerWire, SessionEvent, SessionStats, TorrentBackend, TorrentSession,
};
use transfer_dl::worker::InProcessLauncher;
use transfer_dl::{Result, TransferId};

// ---------------------------------------------------------------------------
// HTTP engine
// ---------------------------------------------------------------------------

/// HTTP engine that records every call
#[derive(Default)]
pub struct FakeHttpEngine {
    sink: Mutex<Option<SignalSink>>,
    pub started: Mutex<Vec<TransferTarget>>,
    pub paused: Mutex<Vec<TransferId>>,
    pub resumed: Mutex<Vec<TransferId>>,
    pub cancelled: Mutex<Vec<TransferId>>,
}

impl FakeHttpEngine {
    pub fn signal(&self, signal: EngineSignal) {
        let sink = self.sink.lock().unwrap().clone().expect("engine attached");
        sink.send(signal);
    }

    pub fn complete(&self, id: TransferId) {
        self.signal(EngineSignal::Finished {
            id,
            outcome: FinishOutcome::Completed { path: None },
        });
    }

    pub fn started_ids(&self) -> Vec<TransferId> {
        self.started.lock().unwrap().iter().map(|t| t.id).collect()
    }

    /// Target handed to `start` for `id`
    pub fn target(&self, id: TransferId) -> Option<TransferTarget> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }
}

#[async_trait]
impl DownloadEngine for FakeHttpEngine {
    fn attach(&self, sink: SignalSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    async fn start(&self, target: &TransferTarget) -> Result<()> {
        self.started.lock().unwrap().push(target.clone());
        Ok(())
    }

    async fn pause(&self, id: TransferId) -> Result<()> {
        self.paused.lock().unwrap().push(id);
        Ok(())
    }

    async fn resume(&self, id: TransferId) -> Result<()> {
        self.resumed.lock().unwrap().push(id);
        Ok(())
    }

    async fn cancel(&self, id: TransferId) -> Result<()> {
        self.cancelled.lock().unwrap().push(id);
        Ok(())
    }

    async fn restore(&self, target: &TransferTarget, _token: &str) -> Result<()> {
        self.started.lock().unwrap().push(target.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Extraction worker
// ---------------------------------------------------------------------------

/// Extraction worker that reports success without decoding anything
#[derive(Clone, Default)]
pub struct CountingExtractor {
    pub jobs: Arc<Mutex<Vec<ExtractionCommand>>>,
}

impl CountingExtractor {
    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn launcher(&self) -> InProcessLauncher {
        let jobs = self.jobs.clone();
        InProcessLauncher::new(move |mut ctx| {
            let jobs = jobs.clone();
            async move {
                ctx.outbox.ready();
                while let Some(request) = ctx.requests.recv().await {
                    let command = match request.decode::<ExtractionCommand>() {
                        Ok(command) => command,
                        Err(e) => {
                            ctx.outbox.respond(request.request_id, Err(e.to_string()));
                            continue;
                        }
                    };
                    let ExtractionCommand::Extract { out_dir, .. } = &command;
                    let result = ExtractResult {
                        status: ExtractStatus::Done,
                        extract_dir: out_dir.clone(),
                    };
                    jobs.lock().unwrap().push(command.clone());
                    ctx.outbox.respond(
                        request.request_id,
                        Ok(serde_json::to_value(result).unwrap()),
                    );
                }
            }
            .boxed()
        })
    }
}

// ---------------------------------------------------------------------------
// Peer-to-peer library
// ---------------------------------------------------------------------------

pub struct FakeWire {
    choked: AtomicBool,
    upload_limit: AtomicU64,
}

impl FakeWire {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            choked: AtomicBool::new(false),
            upload_limit: AtomicU64::new(u64::MAX),
        })
    }

    pub fn is_silenced(&self) -> bool {
        self.choked.load(Ordering::SeqCst) && self.upload_limit.load(Ordering::SeqCst) == 0
    }
}

impl PeerWire for FakeWire {
    fn choke(&self) {
        self.choked.store(true, Ordering::SeqCst);
    }

    fn throttle_upload(&self, bytes_per_sec: u64) {
        self.upload_limit.store(bytes_per_sec, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        false
    }
}

/// Test-side handle on one opened session
pub struct FakeSessionState {
    pub locator: String,
    events: mpsc::UnboundedSender<SessionEvent>,
    pub stats: Mutex<SessionStats>,
    wires: Mutex<Vec<Arc<FakeWire>>>,
    destroyed: AtomicBool,
}

impl FakeSessionState {
    pub fn send(&self, event: SessionEvent) {
        self.events.send(event).unwrap();
    }

    pub fn attach(&self, wire: Arc<FakeWire>) {
        self.wires.lock().unwrap().push(wire.clone());
        self.send(SessionEvent::WireAttached(wire));
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

struct FakeSession(Arc<FakeSessionState>);

#[async_trait]
impl TorrentSession for FakeSession {
    fn stats(&self) -> SessionStats {
        self.0.stats.lock().unwrap().clone()
    }

    fn wires(&self) -> Vec<Arc<dyn PeerWire>> {
        self.0
            .wires
            .lock()
            .unwrap()
            .iter()
            .map(|w| w.clone() as Arc<dyn PeerWire>)
            .collect()
    }

    async fn destroy(&self, _delete_files: bool) {
        self.0.destroyed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeTorrentBackend {
    sessions: Mutex<Vec<Arc<FakeSessionState>>>,
}

impl FakeTorrentBackend {
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn session(&self, index: usize) -> Arc<FakeSessionState> {
        self.sessions.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl TorrentBackend for FakeTorrentBackend {
    async fn open(
        &self,
        locator: &str,
        _destination: &Path,
        _trackers: &[String],
    ) -> std::result::Result<OpenedSession, String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(FakeSessionState {
            locator: locator.to_string(),
            events: tx,
            stats: Mutex::new(SessionStats::default()),
            wires: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        });
        self.sessions.lock().unwrap().push(state.clone());
        Ok(OpenedSession {
            session: Box::new(FakeSession(state)),
            events: rx,
        })
    }
}

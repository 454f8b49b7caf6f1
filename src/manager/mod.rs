//! Public entry point
//!
//! [`TransferManager`] is a cheap, cloneable handle. The scheduler itself lives
//! in a single control-loop task; every public call is a message with a
//! `oneshot` reply and every engine signal is a message on the same channel,
//! so record state has exactly one writer.
//!
//! - [`control_loop`] - owns the scheduler, health timer and store flushes
//! - [`driver`] - executes scheduler commands against the engines
//! - [`lifecycle`] - shutdown coordination

mod control_loop;
mod driver;
mod lifecycle;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use lifecycle::run_with_shutdown;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::Database;
use crate::debrid::{DebridResolver, HttpDebridResolver};
use crate::engine::{DownloadEngine, EngineSignal, FinishOutcome, SignalSink};
use crate::error::{Error, Result, TransferError};
use crate::extraction::{ExtractStatus, ExtractionClient};
use crate::scheduler::{Scheduler, SchedulerSettings};
use crate::store::{TransferPersistence, TransferStore};
use crate::torrent::{TorrentBackend, TorrentGateway, TorrentWorker};
use crate::types::{Event, NewTransfer, TransferId, TransferRecord};
use crate::worker::{ProcessLauncher, WorkerKind, WorkerLauncher};

use control_loop::{ControlMessage, LoopTimers};
use driver::{CommandQueue, EngineDriver};

/// Engines and services supplied by the host
///
/// Anything left `None` is unavailable: transfers of that kind fail with
/// [`TransferError::NoEngine`]. The extraction worker defaults to the
/// `transfer-worker` executable and the debrid resolver to
/// [`HttpDebridResolver`] when [`Config::debrid`] is set.
#[derive(Clone, Default)]
pub struct Engines {
    /// HTTP download engine
    pub http: Option<Arc<dyn DownloadEngine>>,
    /// Peer-to-peer library run inside the torrent worker
    pub torrent: Option<Arc<dyn TorrentBackend>>,
    /// How to launch the extraction worker
    pub extraction: Option<Arc<dyn WorkerLauncher>>,
    /// Debrid link resolver
    pub debrid: Option<Arc<dyn DebridResolver>>,
}

/// Transfer manager handle (cloneable; all fields are shared)
#[derive(Clone)]
pub struct TransferManager {
    /// Database for persistence
    /// Public for integration tests to inspect persisted state
    pub db: Arc<Database>,
    pub(crate) config: Arc<Config>,
    pub(crate) control_tx: mpsc::UnboundedSender<ControlMessage>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) torrent: Option<TorrentGateway>,
    pub(crate) extraction: Option<ExtractionClient>,
    pub(crate) debrid: Option<Arc<dyn DebridResolver>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) tasks: Arc<tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl TransferManager {
    /// Create a manager, restore persisted transfers and start scheduling
    ///
    /// This:
    /// - validates the configuration and creates the download directory
    /// - opens (or creates) the SQLite database and loads every record
    /// - wires engine and worker events into the control loop
    /// - re-queues transfers that were running when the process stopped
    pub async fn new(config: Config, engines: Engines) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.download.download_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download.download_dir.display(),
                        e
                    ),
                ))
            })?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        if db.was_unclean_shutdown().await? {
            tracing::warn!("Previous session did not shut down cleanly; recovering state");
        }
        db.set_clean_start().await?;
        let store = TransferStore::load(db.as_ref()).await?;

        let (event_tx, _rx) = broadcast::channel(1000);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let signals = {
            let tx = control_tx.clone();
            SignalSink::new(move |signal| {
                // the loop is gone during shutdown; late signals are dropped
                tx.send(ControlMessage::Signal(signal)).ok();
            })
        };

        let torrent = match engines.torrent {
            Some(backend) => {
                let launcher = Arc::new(TorrentWorker::launcher(backend, config.torrent.clone()));
                let gateway = TorrentGateway::new(
                    launcher,
                    config.torrent.ready_timeout,
                    config.torrent.call_timeout,
                );
                wire_torrent_events(&gateway, &signals).await;
                Some(gateway)
            }
            None => None,
        };

        let extraction = match engines
            .extraction
            .or_else(|| discover_extraction_worker(&config))
        {
            Some(launcher) => {
                let client = ExtractionClient::new(launcher, config.extraction.worker_ready_timeout);
                wire_extraction_events(&client, &signals).await;
                Some(client)
            }
            None => {
                tracing::warn!("No extraction worker available; archives will not be extracted");
                None
            }
        };

        let debrid = match (engines.debrid, &config.debrid) {
            (Some(resolver), _) => Some(resolver),
            (None, Some(debrid)) => {
                Some(Arc::new(HttpDebridResolver::new(debrid)?) as Arc<dyn DebridResolver>)
            }
            (None, None) => None,
        };

        if let Some(http) = &engines.http {
            http.attach(signals.clone());
        }

        let cancel = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let driver = EngineDriver {
            http: engines.http,
            torrent: torrent.clone(),
            extraction: extraction.clone(),
            extraction_timeout: config.extraction.extraction_timeout,
            signals,
        };
        let driver_task = tokio::spawn(driver.run(command_rx, cancel.clone()));

        let mut scheduler = Scheduler::new(
            store,
            SchedulerSettings::from_config(&config),
            Arc::new(CommandQueue::new(command_tx)),
            event_tx.clone(),
        );
        scheduler.restore_after_restart();

        let persistence: Arc<dyn TransferPersistence> = db.clone();
        let timers = LoopTimers {
            health_check: config.download.health_check_interval,
            flush: config.download.flush_interval,
        };
        let loop_task = tokio::spawn(control_loop::run(
            scheduler,
            control_rx,
            persistence,
            timers,
            cancel.clone(),
        ));

        Ok(Self {
            db,
            config: Arc::new(config),
            control_tx,
            event_tx,
            torrent,
            extraction,
            debrid,
            cancel,
            tasks: Arc::new(tokio::sync::Mutex::new(vec![loop_task, driver_task])),
        })
    }

    /// Admit a transfer
    ///
    /// With `use_debrid` the source is resolved to a direct link first; a
    /// failed resolution rejects the request and nothing is queued.
    pub async fn add(&self, mut request: NewTransfer) -> Result<TransferId> {
        if request.use_debrid {
            let resolver = self
                .debrid
                .as_ref()
                .ok_or_else(|| Error::Debrid("no debrid service configured".to_string()))?;
            let resolved = resolver.resolve(request.source.trim()).await?;
            request.source = resolved;
        }
        self.request(|reply| ControlMessage::Add { request, reply })
            .await?
    }

    /// Pause a transfer
    pub async fn pause(&self, id: TransferId) -> Result<()> {
        self.request(|reply| ControlMessage::Pause { id, reply })
            .await?
    }

    /// Resume a paused transfer
    pub async fn resume(&self, id: TransferId) -> Result<()> {
        self.request(|reply| ControlMessage::Resume { id, reply })
            .await?
    }

    /// Cancel a transfer and delete its partial data
    pub async fn cancel(&self, id: TransferId) -> Result<()> {
        self.request(|reply| ControlMessage::Cancel { id, reply })
            .await?
    }

    /// Remove a transfer record, optionally deleting its files
    pub async fn remove(&self, id: TransferId, delete_files: bool) -> Result<()> {
        self.request(|reply| ControlMessage::Remove {
            id,
            delete_files,
            reply,
        })
        .await?
    }

    /// Change the concurrency budget
    pub async fn set_max_concurrent(&self, max: usize) -> Result<()> {
        self.request(|reply| ControlMessage::SetMaxConcurrent { max, reply })
            .await?
    }

    /// Toggle seeding for every torrent at runtime
    pub async fn set_seeding(&self, enabled: bool) -> Result<()> {
        let gateway = self
            .torrent
            .as_ref()
            .ok_or(Error::Transfer(TransferError::NoEngine("torrent")))?;
        gateway.set_seeding(enabled).await?;
        tracing::info!(enabled, "Seeding policy changed");
        Ok(())
    }

    /// Get one transfer
    pub async fn get(&self, id: TransferId) -> Result<TransferRecord> {
        self.request(|reply| ControlMessage::Get { id, reply })
            .await?
            .ok_or_else(|| TransferError::NotFound { id }.into())
    }

    /// Snapshot of every transfer in admission order
    pub async fn list(&self) -> Result<Vec<TransferRecord>> {
        self.request(|reply| ControlMessage::List { reply }).await
    }

    /// Subscribe to events
    ///
    /// Each subscriber receives every event from the moment it subscribes.
    /// A subscriber that falls more than 1000 events behind receives
    /// `RecvError::Lagged` and skips ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Events as a [`Stream`](futures::Stream)
    pub fn event_stream(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.subscribe())
    }

    /// Current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControlMessage,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.control_tx
            .send(build(reply))
            .map_err(|_| Error::ShuttingDown)?;
        rx.await.map_err(|_| Error::ShuttingDown)
    }
}

/// Executable path of the extraction worker, from config or PATH
fn discover_extraction_worker(config: &Config) -> Option<Arc<dyn WorkerLauncher>> {
    let program: Option<PathBuf> = match &config.extraction.worker_path {
        Some(path) => Some(path.clone()),
        None if config.extraction.search_path => which::which("transfer-worker").ok(),
        None => None,
    };
    program.map(|program| {
        tracing::info!(program = %program.display(), "Using extraction worker executable");
        Arc::new(ProcessLauncher::new(program, Vec::new())) as Arc<dyn WorkerLauncher>
    })
}

/// Forward torrent worker events as engine signals
async fn wire_torrent_events(gateway: &TorrentGateway, signals: &SignalSink) {
    let sink = signals.clone();
    gateway
        .on_metadata(move |m| {
            if let Some(id) = parse_id(&m.torrent_id) {
                sink.send(EngineSignal::Metadata {
                    id,
                    name: m.name,
                    total_bytes: m.total_bytes,
                    info_hash: m.info_hash,
                });
            }
        })
        .await;

    let sink = signals.clone();
    gateway
        .on_progress(move |p| {
            if let Some(id) = parse_id(&p.torrent_id) {
                sink.send(EngineSignal::Progress {
                    id,
                    transferred_bytes: p.downloaded,
                    total_bytes: None,
                    uploaded_bytes: p.uploaded,
                    state: crate::engine::EngineState::Progressing,
                    can_resume: true,
                });
            }
        })
        .await;

    let sink = signals.clone();
    gateway
        .on_done(move |d| {
            if let Some(id) = parse_id(&d.torrent_id) {
                sink.send(EngineSignal::Finished {
                    id,
                    outcome: FinishOutcome::Completed { path: d.path },
                });
            }
        })
        .await;

    let sink = signals.clone();
    gateway
        .on_error(move |f| {
            if let Some(id) = parse_id(&f.torrent_id) {
                sink.send(EngineSignal::Finished {
                    id,
                    outcome: FinishOutcome::Failed(f.error),
                });
            }
        })
        .await;

    let sink = signals.clone();
    gateway
        .on_exit(move || {
            sink.send(EngineSignal::WorkerExited {
                worker: WorkerKind::TorrentEngine,
            })
        })
        .await;
}

/// Forward extraction progress and crashes as engine signals
async fn wire_extraction_events(client: &ExtractionClient, signals: &SignalSink) {
    let sink = signals.clone();
    client
        .on_progress(move |p| {
            // completion and failure arrive through the extract call's result
            if let (ExtractStatus::Progress, Some(percent)) = (p.status, p.percent) {
                sink.send(EngineSignal::ExtractionProgress {
                    key: p.job_key,
                    percent,
                })
            }
        })
        .await;

    let sink = signals.clone();
    client
        .gateway()
        .on(crate::worker::WORKER_EXIT_EVENT, move |_| {
            sink.send(EngineSignal::WorkerExited {
                worker: WorkerKind::Extraction,
            })
        })
        .await;
}

fn parse_id(raw: &str) -> Option<TransferId> {
    match raw.parse() {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(torrent_id = raw, error = %e, "Event for unknown torrent id");
            None
        }
    }
}

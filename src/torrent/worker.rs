//! Torrent worker: owns every session of the peer-to-peer library.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::backend::{PeerWire, SessionEvent, TorrentBackend, TorrentSession};
use super::protocol::{
    TORRENT_DONE_EVENT, TORRENT_ERROR_EVENT, TORRENT_METADATA_EVENT, TORRENT_PROGRESS_EVENT,
    TorrentCommand, TorrentDone, TorrentFailure, TorrentMetadata, TorrentProgress,
};
use crate::config::TorrentConfig;
use crate::worker::{InProcessLauncher, WorkerContext, WorkerOutbox, WorkerRequest};

type TaggedEvent = (String, u64, SessionEvent);

struct LiveSession {
    generation: u64,
    session: Box<dyn TorrentSession>,
    forwarder: JoinHandle<()>,
}

impl LiveSession {
    async fn destroy(self, delete_files: bool) {
        self.forwarder.abort();
        self.session.destroy(delete_files).await;
    }
}

struct TorrentEntry {
    /// Magnet URI, info hash or torrent file reference used to (re)open
    locator: String,
    destination: PathBuf,
    trackers: Vec<String>,
    content_path: Option<PathBuf>,
    live: Option<LiveSession>,
}

/// Serves torrent commands against a [`TorrentBackend`]
///
/// With seeding disabled every peer is choked and upload-throttled to zero as
/// soon as it attaches, and again on every rechoke tick, so uploads stay at 0.
pub struct TorrentWorker {
    backend: Arc<dyn TorrentBackend>,
    seeding: bool,
    progress_interval: Duration,
    rechoke_interval: Duration,
    torrents: HashMap<String, TorrentEntry>,
    next_generation: u64,
    session_tx: mpsc::UnboundedSender<TaggedEvent>,
    session_rx: Option<mpsc::UnboundedReceiver<TaggedEvent>>,
}

impl TorrentWorker {
    /// Create a worker
    pub fn new(backend: Arc<dyn TorrentBackend>, config: &TorrentConfig) -> Self {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            seeding: config.seeding_enabled,
            progress_interval: config.progress_interval(),
            rechoke_interval: config.rechoke_interval,
            torrents: HashMap::new(),
            next_generation: 0,
            session_tx,
            session_rx: Some(session_rx),
        }
    }

    /// Launcher running a fresh worker as a tokio task on every launch
    pub fn launcher(backend: Arc<dyn TorrentBackend>, config: TorrentConfig) -> InProcessLauncher {
        InProcessLauncher::new(move |ctx| {
            TorrentWorker::new(Arc::clone(&backend), &config)
                .run(ctx)
                .boxed()
        })
    }

    /// Serve requests until the host drops its side, then destroy all sessions
    pub async fn run(mut self, mut ctx: WorkerContext) {
        let Some(mut session_rx) = self.session_rx.take() else {
            return;
        };

        let mut progress = tokio::time::interval(self.progress_interval);
        progress.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut rechoke = tokio::time::interval(self.rechoke_interval);
        rechoke.set_missed_tick_behavior(MissedTickBehavior::Skip);

        ctx.outbox.ready();
        tracing::info!(seeding = self.seeding, "Torrent worker ready");

        loop {
            tokio::select! {
                request = ctx.requests.recv() => match request {
                    Some(request) => self.handle_request(request, &ctx.outbox).await,
                    None => break,
                },
                Some((id, generation, event)) = session_rx.recv() => {
                    self.handle_session_event(&id, generation, event, &ctx.outbox).await;
                }
                _ = progress.tick() => self.report_progress(&ctx.outbox),
                _ = rechoke.tick() => {
                    if !self.seeding {
                        self.rechoke_all();
                    }
                }
            }
        }

        for (id, entry) in self.torrents.drain() {
            if let Some(live) = entry.live {
                tracing::debug!(torrent_id = %id, "Destroying session on worker exit");
                live.destroy(false).await;
            }
        }
        tracing::info!("Torrent worker stopped");
    }

    async fn handle_request(&mut self, request: WorkerRequest, outbox: &WorkerOutbox) {
        let result = match request.decode::<TorrentCommand>() {
            Ok(command) => self.execute(command).await,
            Err(e) => Err(format!("unknown command {:?}: {}", request.command(), e)),
        };
        outbox.respond(request.request_id, result);
    }

    async fn execute(&mut self, command: TorrentCommand) -> Result<Value, String> {
        match command {
            TorrentCommand::Add {
                torrent_id,
                source,
                destination,
                trackers,
            } => {
                if let Some(entry) = self.torrents.get(&torrent_id)
                    && entry.live.is_some()
                {
                    return Ok(json!({ "torrentId": torrent_id }));
                }
                let entry = self
                    .torrents
                    .remove(&torrent_id)
                    .unwrap_or(TorrentEntry {
                        locator: source,
                        destination,
                        trackers,
                        content_path: None,
                        live: None,
                    });
                self.open(torrent_id.clone(), entry).await?;
                tracing::info!(torrent_id = %torrent_id, "Torrent added");
                Ok(json!({ "torrentId": torrent_id }))
            }
            TorrentCommand::Pause { torrent_id } => {
                let entry = self
                    .torrents
                    .get_mut(&torrent_id)
                    .ok_or_else(|| format!("unknown torrent {}", torrent_id))?;
                if let Some(live) = entry.live.take() {
                    live.destroy(false).await;
                    tracing::info!(torrent_id = %torrent_id, locator = %entry.locator, "Torrent paused");
                }
                Ok(Value::Null)
            }
            TorrentCommand::Resume { torrent_id } => {
                let entry = self
                    .torrents
                    .remove(&torrent_id)
                    .ok_or_else(|| format!("unknown torrent {}", torrent_id))?;
                if entry.live.is_some() {
                    self.torrents.insert(torrent_id, entry);
                    return Ok(Value::Null);
                }
                self.open(torrent_id.clone(), entry).await?;
                tracing::info!(torrent_id = %torrent_id, "Torrent resumed");
                Ok(Value::Null)
            }
            TorrentCommand::Remove {
                torrent_id,
                delete_files,
            } => {
                let Some(entry) = self.torrents.remove(&torrent_id) else {
                    return Ok(Value::Null);
                };
                match entry.live {
                    Some(live) => live.destroy(delete_files).await,
                    None if delete_files => {
                        if let Some(path) = &entry.content_path {
                            remove_content(path).await;
                        }
                    }
                    None => {}
                }
                tracing::info!(torrent_id = %torrent_id, delete_files, "Torrent removed");
                Ok(Value::Null)
            }
            TorrentCommand::SetSeeding { enabled } => {
                self.seeding = enabled;
                if !enabled {
                    self.rechoke_all();
                }
                tracing::info!(enabled, "Seeding toggled");
                Ok(Value::Null)
            }
        }
    }

    /// Open a session for `entry` and register it under `id`
    ///
    /// On failure the entry is kept (without a session) so it can be retried.
    async fn open(&mut self, id: String, mut entry: TorrentEntry) -> Result<(), String> {
        let opened = match self
            .backend
            .open(&entry.locator, &entry.destination, &entry.trackers)
            .await
        {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!(torrent_id = %id, error = %e, "Failed to open torrent");
                self.torrents.insert(id, entry);
                return Err(e);
            }
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.session_tx.clone();
        let tag = id.clone();
        let mut events = opened.events;
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send((tag.clone(), generation, event)).is_err() {
                    break;
                }
            }
        });

        if !self.seeding {
            for wire in opened.session.wires() {
                silence(wire.as_ref());
            }
        }

        entry.live = Some(LiveSession {
            generation,
            session: opened.session,
            forwarder,
        });
        self.torrents.insert(id, entry);
        Ok(())
    }

    async fn handle_session_event(
        &mut self,
        id: &str,
        generation: u64,
        event: SessionEvent,
        outbox: &WorkerOutbox,
    ) {
        let seeding = self.seeding;
        let Some(entry) = self.torrents.get_mut(id) else {
            return;
        };
        if entry.live.as_ref().map(|l| l.generation) != Some(generation) {
            // event from a session that was already destroyed
            return;
        }

        match event {
            SessionEvent::Metadata(metadata) => {
                if !entry.locator.starts_with("magnet:") {
                    entry.locator = metadata.info_hash.clone();
                }
                entry.content_path = Some(metadata.content_path);
                tracing::info!(torrent_id = %id, name = %metadata.name, info_hash = %metadata.info_hash, "Torrent metadata resolved");
                outbox.emit(
                    TORRENT_METADATA_EVENT,
                    &TorrentMetadata {
                        torrent_id: id.to_string(),
                        name: metadata.name,
                        total_bytes: metadata.total_bytes,
                        info_hash: metadata.info_hash,
                    },
                );
            }
            SessionEvent::WireAttached(wire) => {
                if !seeding {
                    silence(wire.as_ref());
                }
            }
            SessionEvent::Done => {
                outbox.emit(
                    TORRENT_DONE_EVENT,
                    &TorrentDone {
                        torrent_id: id.to_string(),
                        path: entry.content_path.clone(),
                    },
                );
                if !seeding && let Some(live) = entry.live.take() {
                    live.destroy(false).await;
                }
                tracing::info!(torrent_id = %id, seeding, "Torrent done");
            }
            SessionEvent::Error(error) => {
                tracing::warn!(torrent_id = %id, error = %error, "Torrent engine error");
                if let Some(live) = entry.live.take() {
                    live.destroy(false).await;
                }
                outbox.emit(
                    TORRENT_ERROR_EVENT,
                    &TorrentFailure {
                        torrent_id: id.to_string(),
                        error,
                    },
                );
            }
        }
    }

    fn report_progress(&self, outbox: &WorkerOutbox) {
        for (id, entry) in &self.torrents {
            let Some(live) = &entry.live else { continue };
            let stats = live.session.stats();
            let (uploaded, upload_speed) = if self.seeding {
                (stats.uploaded, stats.upload_speed)
            } else {
                (0, 0.0)
            };
            outbox.emit(
                TORRENT_PROGRESS_EVENT,
                &TorrentProgress {
                    torrent_id: id.clone(),
                    downloaded: stats.downloaded,
                    uploaded,
                    progress: stats.progress,
                    download_speed: stats.download_speed,
                    upload_speed,
                    peers: stats.peers,
                },
            );
        }
    }

    fn rechoke_all(&self) {
        for entry in self.torrents.values() {
            if let Some(live) = &entry.live {
                for wire in live.session.wires() {
                    silence(wire.as_ref());
                }
            }
        }
    }
}

fn silence(wire: &dyn PeerWire) {
    if wire.is_closed() {
        return;
    }
    wire.choke();
    wire.throttle_upload(0);
}

async fn remove_content(path: &Path) {
    let result = if path.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Ok(()) => tracing::info!(path = ?path, "Deleted torrent content"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to delete torrent content"),
    }
}

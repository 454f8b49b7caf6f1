//! Host side of the torrent worker.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use super::protocol::{
    TORRENT_DONE_EVENT, TORRENT_ERROR_EVENT, TORRENT_METADATA_EVENT, TORRENT_PROGRESS_EVENT,
    TorrentCommand, TorrentDone, TorrentFailure, TorrentMetadata, TorrentProgress,
};
use crate::error::WorkerError;
use crate::worker::{WORKER_EXIT_EVENT, WorkerGateway, WorkerKind, WorkerLauncher};

/// Typed commands to the torrent worker
///
/// Every command (re)starts the worker when no live handle exists, so the
/// first call after a crash launches a replacement.
#[derive(Clone)]
pub struct TorrentGateway {
    gateway: WorkerGateway,
    ready_timeout: Duration,
    call_timeout: Duration,
}

impl TorrentGateway {
    /// Create a gateway; the worker launches on [`start`](Self::start) or the first command
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        ready_timeout: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            gateway: WorkerGateway::new(WorkerKind::TorrentEngine, launcher),
            ready_timeout,
            call_timeout,
        }
    }

    /// The underlying gateway
    pub fn gateway(&self) -> &WorkerGateway {
        &self.gateway
    }

    /// Launch the worker if needed and wait until it is ready
    pub async fn start(&self) -> Result<(), WorkerError> {
        self.gateway.start(self.ready_timeout).await
    }

    async fn send(&self, command: TorrentCommand) -> Result<(), WorkerError> {
        self.start().await?;
        self.gateway.call(&command, self.call_timeout).await?;
        Ok(())
    }

    /// Add a torrent; resolves once the worker accepted it
    pub async fn add(
        &self,
        torrent_id: &str,
        source: &str,
        destination: &Path,
        trackers: &[String],
    ) -> Result<(), WorkerError> {
        self.send(TorrentCommand::Add {
            torrent_id: torrent_id.to_string(),
            source: source.to_string(),
            destination: destination.to_path_buf(),
            trackers: trackers.to_vec(),
        })
        .await
    }

    /// Destroy the session, keeping the locator
    pub async fn pause(&self, torrent_id: &str) -> Result<(), WorkerError> {
        self.send(TorrentCommand::Pause {
            torrent_id: torrent_id.to_string(),
        })
        .await
    }

    /// Recreate a paused session
    pub async fn resume(&self, torrent_id: &str) -> Result<(), WorkerError> {
        self.send(TorrentCommand::Resume {
            torrent_id: torrent_id.to_string(),
        })
        .await
    }

    /// Forget a torrent, optionally deleting its content
    pub async fn remove(&self, torrent_id: &str, delete_files: bool) -> Result<(), WorkerError> {
        self.send(TorrentCommand::Remove {
            torrent_id: torrent_id.to_string(),
            delete_files,
        })
        .await
    }

    /// Toggle seeding
    pub async fn set_seeding(&self, enabled: bool) -> Result<(), WorkerError> {
        self.send(TorrentCommand::SetSeeding { enabled }).await
    }

    /// Route `torrent-metadata` events
    pub async fn on_metadata<F>(&self, handler: F)
    where
        F: Fn(TorrentMetadata) + Send + Sync + 'static,
    {
        self.subscribe(TORRENT_METADATA_EVENT, handler).await;
    }

    /// Route `torrent-progress` events
    pub async fn on_progress<F>(&self, handler: F)
    where
        F: Fn(TorrentProgress) + Send + Sync + 'static,
    {
        self.subscribe(TORRENT_PROGRESS_EVENT, handler).await;
    }

    /// Route `torrent-done` events
    pub async fn on_done<F>(&self, handler: F)
    where
        F: Fn(TorrentDone) + Send + Sync + 'static,
    {
        self.subscribe(TORRENT_DONE_EVENT, handler).await;
    }

    /// Route `torrent-error` events
    pub async fn on_error<F>(&self, handler: F)
    where
        F: Fn(TorrentFailure) + Send + Sync + 'static,
    {
        self.subscribe(TORRENT_ERROR_EVENT, handler).await;
    }

    /// Called when the worker dies unexpectedly
    pub async fn on_exit<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.gateway.on(WORKER_EXIT_EVENT, move |_| handler()).await;
    }

    /// Stop the worker
    pub async fn shutdown(&self) {
        self.gateway.shutdown().await;
    }

    async fn subscribe<T, F>(&self, event: &'static str, handler: F)
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.gateway
            .on(event, move |payload| match serde_json::from_value::<T>(payload) {
                Ok(payload) => handler(payload),
                Err(e) => tracing::warn!(event, error = %e, "Malformed torrent event payload"),
            })
            .await;
    }
}

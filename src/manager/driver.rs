//! Executes scheduler commands against the engines.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::{
    CommandSink, DownloadEngine, EngineCommand, EngineSignal, FinishOutcome, SignalSink,
    TransferTarget,
};
use crate::error::{Error, Result, TransferError};
use crate::extraction::ExtractionClient;
use crate::torrent::TorrentGateway;
use crate::types::{TransferId, TransferKind};

/// [`CommandSink`] that queues commands for the driver task
pub(crate) struct CommandQueue {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl CommandQueue {
    pub(crate) fn new(tx: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { tx }
    }
}

impl CommandSink for CommandQueue {
    fn dispatch(&self, command: EngineCommand) {
        if self.tx.send(command).is_err() {
            tracing::debug!("Engine driver stopped; dropping command");
        }
    }
}

/// Engine handles the driver calls into
#[derive(Clone)]
pub(crate) struct EngineDriver {
    pub(crate) http: Option<Arc<dyn DownloadEngine>>,
    pub(crate) torrent: Option<TorrentGateway>,
    pub(crate) extraction: Option<ExtractionClient>,
    pub(crate) extraction_timeout: Duration,
    pub(crate) signals: SignalSink,
}

impl EngineDriver {
    /// Execute commands in order until the queue closes or `cancel` fires
    ///
    /// Transfer commands run one at a time so a pause always lands before the
    /// resume that follows it. Extraction jobs run in their own tasks.
    pub(crate) async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<EngineCommand>,
        cancel: CancellationToken,
    ) {
        loop {
            let command = tokio::select! {
                command = rx.recv() => command,
                _ = cancel.cancelled() => None,
            };
            let Some(command) = command else {
                break;
            };

            match command {
                EngineCommand::Extract(job) => {
                    let driver = self.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = driver.extract(job) => {}
                            _ = cancel.cancelled() => {}
                        }
                    });
                }
                command => self.execute(command).await,
            }
        }
        tracing::debug!("Engine driver stopped");
    }

    async fn execute(&self, command: EngineCommand) {
        match command {
            EngineCommand::Start(target) => {
                let result = self.start(&target).await;
                self.report_start_failure(&target, result);
            }
            EngineCommand::Resume(target) => {
                let result = self.resume(&target).await;
                self.report_start_failure(&target, result);
            }
            EngineCommand::Restore { target, token } => {
                let result = match self.http() {
                    Ok(engine) => engine.restore(&target, &token).await,
                    Err(e) => Err(e),
                };
                self.report_start_failure(&target, result);
            }
            EngineCommand::Pause { id, kind } => {
                if let Err(e) = self.pause(id, kind).await {
                    tracing::warn!(transfer_id = %id, error = %e, "Engine rejected pause");
                }
            }
            EngineCommand::Cancel {
                id,
                kind,
                delete_files,
                path,
            } => {
                if let Err(e) = self.cancel(id, kind, delete_files, &path).await {
                    tracing::warn!(transfer_id = %id, error = %e, "Engine rejected cancel");
                }
            }
            EngineCommand::DeleteFiles(paths) => delete_files(&paths).await,
            EngineCommand::Extract(job) => self.extract(job).await,
        }
    }

    async fn start(&self, target: &TransferTarget) -> Result<()> {
        match target.kind {
            TransferKind::Http => self.http()?.start(target).await,
            TransferKind::Torrent => self.add_torrent(target).await,
        }
    }

    async fn resume(&self, target: &TransferTarget) -> Result<()> {
        match target.kind {
            TransferKind::Http => self.http()?.resume(target.id).await,
            TransferKind::Torrent => {
                let gateway = self.torrent()?;
                match gateway.resume(&target.id.to_string()).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        // the worker forgot the torrent (restarted); add it again
                        tracing::info!(transfer_id = %target.id, error = %e, "Torrent unknown to worker; re-adding");
                        self.add_torrent(target).await
                    }
                }
            }
        }
    }

    async fn pause(&self, id: TransferId, kind: TransferKind) -> Result<()> {
        match kind {
            TransferKind::Http => self.http()?.pause(id).await,
            TransferKind::Torrent => Ok(self.torrent()?.pause(&id.to_string()).await?),
        }
    }

    async fn cancel(
        &self,
        id: TransferId,
        kind: TransferKind,
        delete_files: bool,
        path: &Path,
    ) -> Result<()> {
        match kind {
            TransferKind::Http => {
                self.http()?.cancel(id).await?;
                if delete_files {
                    remove_path(path).await;
                }
                Ok(())
            }
            TransferKind::Torrent => Ok(self
                .torrent()?
                .remove(&id.to_string(), delete_files)
                .await?),
        }
    }

    async fn add_torrent(&self, target: &TransferTarget) -> Result<()> {
        self.torrent()?
            .add(
                &target.id.to_string(),
                &target.source,
                &target.destination,
                &target.trackers,
            )
            .await?;
        Ok(())
    }

    async fn extract(&self, job: crate::archive::ExtractionJob) {
        let key = job.key.clone();
        let result = match &self.extraction {
            Some(client) => client
                .extract(&job, self.extraction_timeout)
                .await
                .map_err(|e| e.to_string()),
            None => Err("no extraction worker configured".to_string()),
        };
        if let Err(e) = &result {
            tracing::warn!(key = %key, error = %e, "Extraction job failed");
        }
        self.signals
            .send(EngineSignal::ExtractionFinished { key, result });
    }

    /// A transfer the engine refused to start is failed rather than left running
    fn report_start_failure(&self, target: &TransferTarget, result: Result<()>) {
        if let Err(e) = result {
            tracing::warn!(transfer_id = %target.id, kind = target.kind.as_str(), error = %e, "Engine refused transfer");
            self.signals.send(EngineSignal::Finished {
                id: target.id,
                outcome: FinishOutcome::Failed(e.to_string()),
            });
        }
    }

    fn http(&self) -> Result<&Arc<dyn DownloadEngine>> {
        self.http
            .as_ref()
            .ok_or(Error::Transfer(TransferError::NoEngine("http")))
    }

    fn torrent(&self) -> Result<&TorrentGateway> {
        self.torrent
            .as_ref()
            .ok_or(Error::Transfer(TransferError::NoEngine("torrent")))
    }
}

async fn delete_files(paths: &[PathBuf]) {
    for path in paths {
        remove_path(path).await;
    }
}

async fn remove_path(path: &Path) {
    let result = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => tracing::debug!(path = %path.display(), "Deleted file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to delete file"),
    }
}

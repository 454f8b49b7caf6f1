//! Startup and shutdown coordination.

use tokio::sync::oneshot;

use super::TransferManager;
use super::control_loop::ControlMessage;
use crate::error::Result;
use crate::types::Event;

impl TransferManager {
    /// Gracefully shut down the manager
    ///
    /// The shutdown sequence:
    /// 1. Stops the control loop after a final store flush
    /// 2. Stops the engine driver and any running extraction job
    /// 3. Stops the torrent and extraction workers
    /// 4. Marks a clean shutdown in the database
    /// 5. Emits [`Event::Shutdown`]
    ///
    /// Transfers that were running are re-queued on the next start. Calling
    /// this twice is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        let (reply, rx) = oneshot::channel();
        if self
            .control_tx
            .send(ControlMessage::Shutdown { reply })
            .is_ok()
        {
            match rx.await {
                Ok(Ok(())) => tracing::info!("Final state persisted to database"),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Failed to persist final state during shutdown")
                }
                Err(_) => tracing::debug!("Control loop already stopped"),
            }
        }

        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }

        if let Some(torrent) = &self.torrent {
            torrent.shutdown().await;
        }
        if let Some(extraction) = &self.extraction {
            extraction.shutdown().await;
        }

        if let Err(e) = self.db.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
        }

        self.event_tx.send(Event::Shutdown).ok();
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}

/// Run the manager until SIGTERM or SIGINT, then shut it down
///
/// - **Unix:** listens for SIGTERM and SIGINT.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(manager: TransferManager) -> Result<()> {
    wait_for_signal().await;
    manager.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}

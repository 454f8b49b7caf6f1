//! Host side of the extraction worker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::service::{EXTRACT_PROGRESS_EVENT, ExtractProgress, ExtractResult, ExtractionCommand};
use crate::archive::ExtractionJob;
use crate::error::WorkerError;
use crate::worker::{WorkerGateway, WorkerKind, WorkerLauncher};

/// Sends extraction jobs to the extraction worker
///
/// The worker is launched lazily on the first job and relaunched on the next
/// job after a crash.
#[derive(Clone)]
pub struct ExtractionClient {
    gateway: WorkerGateway,
    ready_timeout: Duration,
}

impl ExtractionClient {
    /// Create a client; no worker runs until the first job
    pub fn new(launcher: Arc<dyn WorkerLauncher>, ready_timeout: Duration) -> Self {
        Self {
            gateway: WorkerGateway::new(WorkerKind::Extraction, launcher),
            ready_timeout,
        }
    }

    /// The underlying gateway
    pub fn gateway(&self) -> &WorkerGateway {
        &self.gateway
    }

    /// Route `extract-progress` events to `handler`
    ///
    /// Malformed payloads are logged and dropped.
    pub async fn on_progress<F>(&self, handler: F)
    where
        F: Fn(ExtractProgress) + Send + Sync + 'static,
    {
        self.gateway
            .on(EXTRACT_PROGRESS_EVENT, move |payload| {
                match serde_json::from_value::<ExtractProgress>(payload) {
                    Ok(progress) => handler(progress),
                    Err(e) => tracing::warn!(error = %e, "Malformed extract-progress payload"),
                }
            })
            .await;
    }

    /// Run one job and return the folder holding the extracted files
    pub async fn extract(
        &self,
        job: &ExtractionJob,
        timeout: Duration,
    ) -> Result<PathBuf, WorkerError> {
        self.gateway.start(self.ready_timeout).await?;

        let command = ExtractionCommand::Extract {
            archive_path: job.archive_path.clone(),
            out_dir: job.out_dir.clone(),
            job_key: job.key.clone(),
        };
        let data = self.gateway.call(&command, timeout).await?;
        let result: ExtractResult =
            serde_json::from_value(data).map_err(|e| WorkerError::Protocol(e.to_string()))?;
        Ok(result.extract_dir)
    }

    /// Stop the worker
    pub async fn shutdown(&self) {
        self.gateway.shutdown().await;
    }
}

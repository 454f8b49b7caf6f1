//! Extraction worker body.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::path::PathBuf;

use crate::worker::{WorkerContext, WorkerOutbox, WorkerRequest};

/// Event name for extraction progress
pub const EXTRACT_PROGRESS_EVENT: &str = "extract-progress";

/// Commands understood by the extraction worker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ExtractionCommand {
    /// Extract one archive
    Extract {
        /// Entry point (part 1 for multi-part sets)
        archive_path: PathBuf,
        /// Folder to extract into
        out_dir: PathBuf,
        /// Archive key the host correlates progress with
        job_key: String,
    },
}

/// Phase of an extraction job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractStatus {
    /// Decoding in progress
    Progress,
    /// Finished successfully
    Done,
    /// Decoder failed
    Error,
}

/// Payload of `extract-progress`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractProgress {
    /// Archive key of the job
    pub job_key: String,
    /// Phase
    pub status: ExtractStatus,
    /// Percentage (0.0 to 100.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f32>,
    /// Decoder error, set on [`ExtractStatus::Error`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Output folder, set on [`ExtractStatus::Done`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_dir: Option<PathBuf>,
}

impl ExtractProgress {
    fn progress(job_key: &str, percent: f32) -> Self {
        Self {
            job_key: job_key.to_string(),
            status: ExtractStatus::Progress,
            percent: Some(percent),
            message: None,
            extract_dir: None,
        }
    }

    fn done(job_key: &str, extract_dir: PathBuf) -> Self {
        Self {
            job_key: job_key.to_string(),
            status: ExtractStatus::Done,
            percent: Some(100.0),
            message: None,
            extract_dir: Some(extract_dir),
        }
    }

    fn error(job_key: &str, message: String) -> Self {
        Self {
            job_key: job_key.to_string(),
            status: ExtractStatus::Error,
            percent: None,
            message: Some(message),
            extract_dir: None,
        }
    }
}

/// Final response data of an `extract` call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractResult {
    /// Always [`ExtractStatus::Done`]
    pub status: ExtractStatus,
    /// Folder holding the extracted files
    pub extract_dir: PathBuf,
}

/// Serve extraction requests until the host closes the channel
///
/// Each job decodes on a blocking thread so several archives can extract at
/// once and a slow one never delays the others' responses.
pub async fn run_extraction_worker(mut ctx: WorkerContext) {
    ctx.outbox.ready();
    tracing::info!("Extraction worker ready");

    while let Some(request) = ctx.requests.recv().await {
        let outbox = ctx.outbox.clone();
        tokio::spawn(handle_request(request, outbox));
    }

    tracing::info!("Extraction worker stopping");
}

async fn handle_request(request: WorkerRequest, outbox: WorkerOutbox) {
    let command = match request.decode::<ExtractionCommand>() {
        Ok(command) => command,
        Err(e) => {
            outbox.respond(
                request.request_id,
                Err(format!("unknown command {:?}: {}", request.command(), e)),
            );
            return;
        }
    };

    let ExtractionCommand::Extract {
        archive_path,
        out_dir,
        job_key,
    } = command;

    tracing::info!(job_key = %job_key, archive = ?archive_path, out_dir = ?out_dir, "Extracting archive");
    emit_progress(&outbox, ExtractProgress::progress(&job_key, 0.0));

    let progress_outbox = outbox.clone();
    let progress_key = job_key.clone();
    let target = out_dir.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let last_whole = Cell::new(-1i32);
        let on_progress = |percent: f32| {
            // one event per whole percent
            let whole = percent.floor() as i32;
            if last_whole.replace(whole) != whole {
                emit_progress(
                    &progress_outbox,
                    ExtractProgress::progress(&progress_key, percent),
                );
            }
        };
        super::extract_archive(&archive_path, &target, &on_progress)
    })
    .await;

    let result = match outcome {
        Ok(Ok(files)) => {
            tracing::info!(job_key = %job_key, files = files.len(), "Extraction finished");
            emit_progress(&outbox, ExtractProgress::done(&job_key, out_dir.clone()));
            serde_json::to_value(ExtractResult {
                status: ExtractStatus::Done,
                extract_dir: out_dir,
            })
            .map_err(|e| e.to_string())
        }
        Ok(Err(e)) => {
            tracing::warn!(job_key = %job_key, error = %e, "Extraction failed");
            let message = e.to_string();
            emit_progress(&outbox, ExtractProgress::error(&job_key, message.clone()));
            Err(message)
        }
        Err(e) => {
            tracing::error!(job_key = %job_key, error = %e, "Extraction task panicked");
            let message = format!("extraction task failed: {}", e);
            emit_progress(&outbox, ExtractProgress::error(&job_key, message.clone()));
            Err(message)
        }
    };

    outbox.respond(request.request_id, result);
}

fn emit_progress(outbox: &WorkerOutbox, progress: ExtractProgress) {
    outbox.emit(EXTRACT_PROGRESS_EVENT, &progress);
}

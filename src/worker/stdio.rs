//! Worker-side counterpart of [`ProcessLauncher`](super::ProcessLauncher)
//!
//! [`serve`] connects a worker body to this process's stdin/stdout. Requests
//! are read as JSON lines from stdin; responses and events are written as JSON
//! lines to stdout. Logging must go to stderr.

use std::future::Future;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::protocol::WorkerRequest;
use super::transport::WorkerContext;

/// Run `worker` over stdin/stdout until stdin closes and the worker finishes
pub async fn serve<F, Fut>(worker: F) -> std::io::Result<()>
where
    F: FnOnce(WorkerContext) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (context, channels) = WorkerContext::pair();
    let requests = channels.outbound;
    let mut messages = channels.inbound;

    let worker_task = tokio::spawn(worker(context));

    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WorkerRequest>(&line) {
                Ok(request) => {
                    if requests.send(request).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring malformed request line"),
            }
        }
        tracing::debug!("stdin closed");
        Ok::<(), std::io::Error>(())
    });

    let mut stdout = tokio::io::stdout();
    while let Some(message) = messages.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        stdout.flush().await?;
    }

    reader.abort();
    if let Err(e) = worker_task.await
        && e.is_panic()
    {
        tracing::error!("Worker body panicked");
    }
    Ok(())
}

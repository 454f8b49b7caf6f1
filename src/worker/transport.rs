//! Worker transports
//!
//! A [`WorkerLauncher`] produces a fresh pair of message channels connected to
//! a running worker. The gateway never knows whether the worker is a tokio task
//! ([`InProcessLauncher`]) or a child process speaking newline-delimited JSON
//! over stdin/stdout ([`ProcessLauncher`]). The worker is considered gone when
//! its inbound channel closes.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::protocol::{READY_EVENT, WorkerEvent, WorkerMessage, WorkerRequest, WorkerResponse};
use crate::error::WorkerError;

/// Channels connected to a live worker
pub struct WorkerChannels {
    /// Requests to the worker
    pub outbound: mpsc::UnboundedSender<WorkerRequest>,
    /// Responses and events from the worker; closes when the worker exits
    pub inbound: mpsc::UnboundedReceiver<WorkerMessage>,
}

/// Starts a worker
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Launch a new worker instance
    async fn launch(&self) -> Result<WorkerChannels, WorkerError>;
}

/// Worker-side handle for writing responses and events
#[derive(Clone, Debug)]
pub struct WorkerOutbox {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerOutbox {
    /// Announce readiness
    pub fn ready(&self) {
        self.send(WorkerMessage::Event(WorkerEvent {
            event: READY_EVENT.to_string(),
            payload: Value::Null,
        }));
    }

    /// Answer a request
    ///
    /// Posts carry no request id and get no answer.
    pub fn respond(&self, request_id: Option<u64>, result: Result<Value, String>) {
        let Some(request_id) = request_id else {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Fire-and-forget command failed");
            }
            return;
        };
        let response = match result {
            Ok(data) => WorkerResponse::success(request_id, data),
            Err(e) => WorkerResponse::failure(request_id, e),
        };
        self.send(WorkerMessage::Response(response));
    }

    /// Emit an unsolicited event
    pub fn emit<T: Serialize>(&self, event: &str, payload: &T) {
        match WorkerEvent::new(event, payload) {
            Ok(event) => self.send(WorkerMessage::Event(event)),
            Err(e) => tracing::warn!(event, error = %e, "Failed to encode worker event"),
        }
    }

    /// Whether the host side is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, message: WorkerMessage) {
        // Host gone; nothing left to tell
        self.tx.send(message).ok();
    }
}

/// Everything a worker needs: incoming requests and an outbox
pub struct WorkerContext {
    /// Incoming requests; closes when the host drops its side
    pub requests: mpsc::UnboundedReceiver<WorkerRequest>,
    /// Response/event sink
    pub outbox: WorkerOutbox,
}

impl WorkerContext {
    /// Create a connected context and the host-side channel ends
    pub fn pair() -> (Self, WorkerChannels) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        (
            Self {
                requests: req_rx,
                outbox: WorkerOutbox { tx: msg_tx },
            },
            WorkerChannels {
                outbound: req_tx,
                inbound: msg_rx,
            },
        )
    }
}

type WorkerFactory = Arc<dyn Fn(WorkerContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs the worker as a tokio task inside this process
#[derive(Clone)]
pub struct InProcessLauncher {
    factory: WorkerFactory,
}

impl InProcessLauncher {
    /// Create a launcher from a worker body
    ///
    /// The body is called once per launch; the worker exits when its future
    /// completes and every [`WorkerOutbox`] clone is dropped.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(WorkerContext) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }
}

#[async_trait]
impl WorkerLauncher for InProcessLauncher {
    async fn launch(&self) -> Result<WorkerChannels, WorkerError> {
        let (context, channels) = WorkerContext::pair();
        tokio::spawn((self.factory)(context));
        Ok(channels)
    }
}

/// Runs the worker as a child process speaking JSON lines
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    /// Create a launcher for `program args...`
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Program path
    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<WorkerChannels, WorkerError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                WorkerError::Launch(format!("{}: {}", self.program.display(), e))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Launch("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Launch("worker stdout unavailable".to_string()))?;

        let (req_tx, mut req_rx) = mpsc::unbounded_channel::<WorkerRequest>();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(request) = req_rx.recv().await {
                let mut line = match serde_json::to_vec(&request) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode worker request");
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(e) = stdin.write_all(&line).await {
                    tracing::warn!(error = %e, "Worker stdin closed");
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    tracing::warn!(error = %e, "Worker stdin closed");
                    break;
                }
            }
            // Dropping stdin tells the worker to exit
        });

        let program = self.program.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match serde_json::from_str::<WorkerMessage>(&line) {
                        Ok(message) => {
                            if msg_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, line = %line, "Ignoring malformed worker output")
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read worker output");
                        break;
                    }
                }
            }
            drop(msg_tx);
            match child.wait().await {
                Ok(status) => {
                    tracing::info!(program = %program.display(), %status, "Worker process exited")
                }
                Err(e) => tracing::warn!(program = %program.display(), error = %e, "Failed to reap worker"),
            }
        });

        Ok(WorkerChannels {
            outbound: req_tx,
            inbound: msg_rx,
        })
    }
}

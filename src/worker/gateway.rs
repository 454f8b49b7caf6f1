//! Correlated request/response gateway for one worker kind.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot, watch};
use tokio::time::Instant;

use super::WorkerKind;
use super::protocol::{READY_EVENT, WORKER_EXIT_EVENT, WorkerMessage, WorkerRequest};
use super::transport::WorkerLauncher;
use crate::error::WorkerError;

/// Callback for an unsolicited worker event
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// A request awaiting its response
struct PendingRequest {
    generation: u64,
    deadline: Instant,
    reply: oneshot::Sender<Result<Value, WorkerError>>,
}

/// The single live worker behind a gateway
struct ActiveWorkerHandle {
    generation: u64,
    outbound: mpsc::UnboundedSender<WorkerRequest>,
    ready: bool,
}

#[derive(Default)]
struct GatewayState {
    handle: Option<ActiveWorkerHandle>,
    pending: HashMap<u64, PendingRequest>,
    next_request_id: u64,
    generation: u64,
}

struct GatewayInner {
    kind: WorkerKind,
    launcher: Arc<dyn WorkerLauncher>,
    state: Mutex<GatewayState>,
    handlers: RwLock<HashMap<String, EventHandler>>,
    ready_tx: watch::Sender<bool>,
    start_lock: Mutex<()>,
}

/// Drives one out-of-process worker with correlated requests
///
/// Cheap to clone; clones share the same worker.
///
/// - [`call`](Self::call) assigns a unique `requestId`, waits for the matching
///   response and rejects with [`WorkerError::Timeout`] at the deadline.
///   Whichever of response and deadline comes second is a no-op.
/// - [`post`](Self::post) sends without waiting.
/// - Both fail fast with [`WorkerError::NotReady`] until the worker has emitted
///   `ready`.
/// - When the worker exits every pending call rejects with
///   [`WorkerError::Unavailable`], readiness drops and a `worker-exit` event is
///   dispatched. [`start`](Self::start) launches a replacement.
#[derive(Clone)]
pub struct WorkerGateway {
    inner: Arc<GatewayInner>,
}

impl WorkerGateway {
    /// Create a gateway; no worker runs until [`start`](Self::start)
    pub fn new(kind: WorkerKind, launcher: Arc<dyn WorkerLauncher>) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(GatewayInner {
                kind,
                launcher,
                state: Mutex::new(GatewayState::default()),
                handlers: RwLock::new(HashMap::new()),
                ready_tx,
                start_lock: Mutex::new(()),
            }),
        }
    }

    /// Worker kind served by this gateway
    pub fn kind(&self) -> WorkerKind {
        self.inner.kind
    }

    /// Launch the worker if no live handle exists, then wait for readiness
    pub async fn start(&self, ready_timeout: Duration) -> Result<(), WorkerError> {
        let _guard = self.inner.start_lock.lock().await;

        let running = self.inner.state.lock().await.handle.is_some();
        if !running {
            let channels = self.inner.launcher.launch().await?;
            let generation = {
                let mut state = self.inner.state.lock().await;
                state.generation += 1;
                state.handle = Some(ActiveWorkerHandle {
                    generation: state.generation,
                    outbound: channels.outbound,
                    ready: false,
                });
                state.generation
            };
            tracing::info!(worker = %self.inner.kind, generation, "Worker launched");
            tokio::spawn(read_messages(
                Arc::clone(&self.inner),
                generation,
                channels.inbound,
            ));
        }

        self.wait_ready(ready_timeout).await
    }

    /// Wait until the worker reports ready
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), WorkerError> {
        let mut ready = self.inner.ready_tx.subscribe();
        match tokio::time::timeout(timeout, ready.wait_for(|r| *r)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(WorkerError::Unavailable {
                kind: self.inner.kind,
            }),
            Err(_) => Err(WorkerError::Timeout {
                kind: self.inner.kind,
                after: timeout,
            }),
        }
    }

    /// Whether the worker is live and ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready_tx.borrow()
    }

    /// Watch readiness changes
    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.inner.ready_tx.subscribe()
    }

    /// Send a request and wait for its response
    pub async fn call<T: Serialize>(
        &self,
        message: &T,
        timeout: Duration,
    ) -> Result<Value, WorkerError> {
        let kind = self.inner.kind;
        let mut request = WorkerRequest::new(message)?;
        let (reply_tx, mut reply_rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;

        let request_id = {
            let mut state = self.inner.state.lock().await;
            let (generation, outbound) = match &state.handle {
                Some(handle) if handle.ready => (handle.generation, handle.outbound.clone()),
                _ => return Err(WorkerError::NotReady { kind }),
            };
            state.next_request_id += 1;
            let request_id = state.next_request_id;
            request.request_id = Some(request_id);
            state.pending.insert(
                request_id,
                PendingRequest {
                    generation,
                    deadline,
                    reply: reply_tx,
                },
            );
            if outbound.send(request).is_err() {
                state.pending.remove(&request_id);
                return Err(WorkerError::Unavailable { kind });
            }
            request_id
        };
        let mut guard = PendingGuard {
            inner: Arc::clone(&self.inner),
            request_id,
            armed: true,
        };

        let result = tokio::select! {
            reply = &mut reply_rx => reply.unwrap_or(Err(WorkerError::Unavailable { kind })),
            _ = tokio::time::sleep_until(deadline) => {
                let expired = self.inner.state.lock().await.pending.remove(&request_id);
                if expired.is_some() {
                    tracing::warn!(worker = %kind, request_id, ?timeout, "Worker call timed out");
                    Err(WorkerError::Timeout { kind, after: timeout })
                } else {
                    // The response won the race for the pending entry
                    reply_rx.await.unwrap_or(Err(WorkerError::Unavailable { kind }))
                }
            }
        };
        guard.armed = false;
        result
    }

    /// Send a fire-and-forget message
    pub async fn post<T: Serialize>(&self, message: &T) -> Result<(), WorkerError> {
        let kind = self.inner.kind;
        let request = WorkerRequest::new(message)?;
        let state = self.inner.state.lock().await;
        match &state.handle {
            Some(handle) if handle.ready => handle
                .outbound
                .send(request)
                .map_err(|_| WorkerError::Unavailable { kind }),
            _ => Err(WorkerError::NotReady { kind }),
        }
    }

    /// Register the handler for an event name (replaces any previous one)
    pub async fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .write()
            .await
            .insert(event.to_string(), Arc::new(handler));
    }

    /// Number of calls awaiting a response
    pub async fn pending_count(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    /// Stop the worker
    ///
    /// Closes the request channel so the worker exits, rejects pending calls
    /// and drops readiness. No `worker-exit` event is raised for a deliberate
    /// shutdown.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(handle) = state.handle.take() {
            tracing::info!(worker = %self.inner.kind, generation = handle.generation, "Stopping worker");
            reject_pending(&mut state, handle.generation, self.inner.kind);
        }
        self.inner.ready_tx.send_replace(false);
    }
}

/// Drops a call's pending entry when the caller goes away before it resolves
struct PendingGuard {
    inner: Arc<GatewayInner>,
    request_id: u64,
    armed: bool,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let request_id = self.request_id;
        if let Ok(mut state) = self.inner.state.try_lock() {
            state.pending.remove(&request_id);
            return;
        }
        // state is busy; finish the removal off the drop path
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(&self.inner);
            runtime.spawn(async move {
                inner.state.lock().await.pending.remove(&request_id);
            });
        }
    }
}

/// Reject every pending request of a worker generation
fn reject_pending(state: &mut GatewayState, generation: u64, kind: WorkerKind) {
    let ids: Vec<u64> = state
        .pending
        .iter()
        .filter(|(_, p)| p.generation == generation)
        .map(|(id, _)| *id)
        .collect();
    for id in ids {
        if let Some(pending) = state.pending.remove(&id) {
            pending
                .reply
                .send(Err(WorkerError::Unavailable { kind }))
                .ok();
        }
    }
}

/// Route worker output until the worker's channel closes
async fn read_messages(
    inner: Arc<GatewayInner>,
    generation: u64,
    mut inbound: mpsc::UnboundedReceiver<WorkerMessage>,
) {
    let kind = inner.kind;

    while let Some(message) = inbound.recv().await {
        match message {
            WorkerMessage::Response(response) => {
                let pending = inner.state.lock().await.pending.remove(&response.request_id);
                match pending {
                    Some(pending) => {
                        if Instant::now() > pending.deadline {
                            tracing::debug!(worker = %kind, request_id = response.request_id, "Response arrived at the deadline");
                        }
                        pending.reply.send(response.into_result()).ok();
                    }
                    None => {
                        tracing::debug!(worker = %kind, request_id = response.request_id, "Dropping late response");
                    }
                }
            }
            WorkerMessage::Event(event) if event.event == READY_EVENT => {
                let mut state = inner.state.lock().await;
                if let Some(handle) = state.handle.as_mut()
                    && handle.generation == generation
                {
                    handle.ready = true;
                    inner.ready_tx.send_replace(true);
                    tracing::info!(worker = %kind, generation, "Worker ready");
                }
            }
            WorkerMessage::Event(event) => {
                let handler = inner.handlers.read().await.get(&event.event).cloned();
                match handler {
                    Some(handler) => handler(event.payload),
                    None => tracing::debug!(worker = %kind, event = %event.event, "No handler for worker event"),
                }
            }
        }
    }

    let crashed = {
        let mut state = inner.state.lock().await;
        let current = state
            .handle
            .as_ref()
            .is_some_and(|h| h.generation == generation);
        if current {
            state.handle = None;
            inner.ready_tx.send_replace(false);
        }
        reject_pending(&mut state, generation, kind);
        current
    };

    if crashed {
        tracing::warn!(worker = %kind, generation, "Worker exited unexpectedly");
        let handler = inner.handlers.read().await.get(WORKER_EXIT_EVENT).cloned();
        if let Some(handler) = handler {
            handler(json!({ "worker": kind.to_string(), "generation": generation }));
        }
    }
}

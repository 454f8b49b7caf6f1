//! The task that owns the scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::engine::EngineSignal;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::store::TransferPersistence;
use crate::types::{NewTransfer, TransferId, TransferRecord};

/// Message handled by the control loop
///
/// Public API calls carry a `oneshot` reply; engine signals do not.
pub(crate) enum ControlMessage {
    Add {
        request: NewTransfer,
        reply: oneshot::Sender<Result<TransferId>>,
    },
    Pause {
        id: TransferId,
        reply: oneshot::Sender<Result<()>>,
    },
    Resume {
        id: TransferId,
        reply: oneshot::Sender<Result<()>>,
    },
    Cancel {
        id: TransferId,
        reply: oneshot::Sender<Result<()>>,
    },
    Remove {
        id: TransferId,
        delete_files: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    SetMaxConcurrent {
        max: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    Get {
        id: TransferId,
        reply: oneshot::Sender<Option<TransferRecord>>,
    },
    List {
        reply: oneshot::Sender<Vec<TransferRecord>>,
    },
    Signal(EngineSignal),
    Shutdown {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Timer settings for the control loop
#[derive(Clone, Copy, Debug)]
pub(crate) struct LoopTimers {
    pub(crate) health_check: Duration,
    pub(crate) flush: Duration,
}

/// Run until a shutdown message arrives, the channel closes or `cancel` fires
///
/// Every exit path flushes the store once more.
pub(crate) async fn run(
    mut scheduler: Scheduler,
    mut rx: mpsc::UnboundedReceiver<ControlMessage>,
    persistence: Arc<dyn TransferPersistence>,
    timers: LoopTimers,
    cancel: CancellationToken,
) {
    let mut health = tokio::time::interval(timers.health_check);
    health.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut flush = tokio::time::interval(timers.flush);
    flush.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        records = scheduler.store().len(),
        max_concurrent = scheduler.max_concurrent(),
        "Control loop started"
    );

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else {
                    tracing::debug!("Control channel closed");
                    break;
                };
                if let ControlMessage::Shutdown { reply } = message {
                    let result = flush_store(&mut scheduler, persistence.as_ref()).await.map(|_| ());
                    reply.send(result).ok();
                    tracing::info!("Control loop stopped");
                    return;
                }
                handle_message(&mut scheduler, message);

                // dispatched archive keys must hit the disk before the job can finish
                if scheduler.store().has_pending_archive_keys() {
                    flush_store(&mut scheduler, persistence.as_ref()).await.ok();
                }
            }
            _ = health.tick() => scheduler.health_check(),
            _ = flush.tick() => {
                flush_store(&mut scheduler, persistence.as_ref()).await.ok();
            }
            _ = cancel.cancelled() => break,
        }
    }

    flush_store(&mut scheduler, persistence.as_ref()).await.ok();
    tracing::info!("Control loop stopped");
}

fn handle_message(scheduler: &mut Scheduler, message: ControlMessage) {
    match message {
        ControlMessage::Add { request, reply } => {
            reply.send(scheduler.admit(request)).ok();
        }
        ControlMessage::Pause { id, reply } => {
            reply.send(scheduler.pause(&id)).ok();
        }
        ControlMessage::Resume { id, reply } => {
            reply.send(scheduler.resume(&id)).ok();
        }
        ControlMessage::Cancel { id, reply } => {
            reply.send(scheduler.cancel(&id)).ok();
        }
        ControlMessage::Remove {
            id,
            delete_files,
            reply,
        } => {
            reply.send(scheduler.remove(&id, delete_files)).ok();
        }
        ControlMessage::SetMaxConcurrent { max, reply } => {
            reply.send(scheduler.set_max_concurrent(max)).ok();
        }
        ControlMessage::Get { id, reply } => {
            reply.send(scheduler.get(&id).cloned()).ok();
        }
        ControlMessage::List { reply } => {
            reply.send(scheduler.list()).ok();
        }
        ControlMessage::Signal(signal) => scheduler.handle_signal(signal),
        // handled by the loop
        ControlMessage::Shutdown { reply } => {
            reply.send(Ok(())).ok();
        }
    }
}

async fn flush_store(
    scheduler: &mut Scheduler,
    persistence: &dyn TransferPersistence,
) -> Result<usize> {
    match scheduler.store_mut().flush(persistence).await {
        Ok(written) => Ok(written),
        Err(e) => {
            tracing::error!(error = %e, "Failed to persist transfer store");
            Err(e)
        }
    }
}

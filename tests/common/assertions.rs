//! Waiting helpers for asynchronous manager state

use std::time::Duration;

use tokio::sync::broadcast;
use transfer_dl::{Event, Status, TransferId, TransferManager, TransferRecord};

/// Default wait before a helper gives up
pub const WAIT: Duration = Duration::from_secs(10);

/// Poll the manager until the record reaches `status`
pub async fn wait_for_status(
    manager: &TransferManager,
    id: TransferId,
    status: Status,
) -> TransferRecord {
    wait_for_record(manager, id, |record| record.status == status).await
}

/// Poll the manager until `predicate` holds for the record
pub async fn wait_for_record<F>(
    manager: &TransferManager,
    id: TransferId,
    mut predicate: F,
) -> TransferRecord
where
    F: FnMut(&TransferRecord) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let record = manager.get(id).await.expect("record should exist");
        if predicate(&record) {
            return record;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting on transfer {id}, last state: {record:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for the first event matching `predicate`
pub async fn wait_for_event<F>(events: &mut broadcast::Receiver<Event>, mut predicate: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll until `check` holds
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {WAIT:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}


use super::*;
use crate::engine::TransferTarget;
use crate::types::Status;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// HTTP engine that records calls; tests drive its signals by hand
#[derive(Default)]
struct FakeHttpEngine {
    sink: Mutex<Option<SignalSink>>,
    started: Mutex<Vec<TransferId>>,
    paused: Mutex<Vec<TransferId>>,
    cancelled: Mutex<Vec<TransferId>>,
    restored: Mutex<Vec<(TransferId, String)>>,
}

impl FakeHttpEngine {
    fn signal(&self, signal: EngineSignal) {
        let sink = self.sink.lock().unwrap().clone().expect("engine attached");
        sink.send(signal);
    }

    fn complete(&self, id: TransferId) {
        self.signal(EngineSignal::Finished {
            id,
            outcome: FinishOutcome::Completed { path: None },
        });
    }

    fn started(&self) -> Vec<TransferId> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl DownloadEngine for FakeHttpEngine {
    fn attach(&self, sink: SignalSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    async fn start(&self, target: &TransferTarget) -> Result<()> {
        self.started.lock().unwrap().push(target.id);
        Ok(())
    }

    async fn pause(&self, id: TransferId) -> Result<()> {
        self.paused.lock().unwrap().push(id);
        Ok(())
    }

    async fn resume(&self, id: TransferId) -> Result<()> {
        self.started.lock().unwrap().push(id);
        Ok(())
    }

    async fn cancel(&self, id: TransferId) -> Result<()> {
        self.cancelled.lock().unwrap().push(id);
        Ok(())
    }

    async fn restore(&self, target: &TransferTarget, token: &str) -> Result<()> {
        self.restored
            .lock()
            .unwrap()
            .push((target.id, token.to_string()));
        Ok(())
    }
}

struct StaticResolver;

#[async_trait]
impl DebridResolver for StaticResolver {
    async fn resolve(&self, url: &str) -> Result<String> {
        if url.contains("blocked") {
            return Err(Error::Debrid("hoster not supported".to_string()));
        }
        Ok("https://cdn.example/direct/file.bin".to_string())
    }
}

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.download_dir = dir.path().join("downloads");
    config.download.max_concurrent_downloads = 2;
    config.persistence.database_path = dir.path().join("transfers.db");
    config.extraction.search_path = false;
    config
}

async fn manager_with(dir: &TempDir, engines: Engines) -> TransferManager {
    TransferManager::new(test_config(dir), engines).await.unwrap()
}

fn http_engines(engine: &Arc<FakeHttpEngine>) -> Engines {
    Engines {
        http: Some(engine.clone()),
        ..Default::default()
    }
}

fn http(name: &str) -> NewTransfer {
    NewTransfer {
        source: format!("https://files.example/{name}"),
        ..Default::default()
    }
}

/// Poll until the record reaches `status`
async fn wait_for_status(manager: &TransferManager, id: TransferId, status: Status) -> TransferRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let record = manager.get(id).await.unwrap();
        if record.status == status {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {status}, record is {}",
            record.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `check` holds
async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

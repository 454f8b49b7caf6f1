//! Test configuration helpers

use std::sync::Arc;

use tempfile::TempDir;
use transfer_dl::{Config, Engines, NewTransfer, TransferManager};

use super::fakes::FakeHttpEngine;

/// Config rooted in a temp dir with fast worker timers
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.download_dir = dir.path().join("downloads");
    config.download.max_concurrent_downloads = 2;
    config.persistence.database_path = dir.path().join("transfers.db");
    config.torrent.progress_interval_ms = 20;
    config.extraction.search_path = false;
    config
}

/// Engines with only the fake HTTP engine wired in
pub fn http_engines(engine: &Arc<FakeHttpEngine>) -> Engines {
    Engines {
        http: Some(engine.clone()),
        ..Default::default()
    }
}

/// Start a manager over `config`
pub async fn start_manager(config: Config, engines: Engines) -> TransferManager {
    TransferManager::new(config, engines)
        .await
        .expect("manager should start")
}

/// A direct download of `https://files.example/{name}`
pub fn http_transfer(name: &str) -> NewTransfer {
    NewTransfer {
        source: format!("https://files.example/{name}"),
        ..Default::default()
    }
}

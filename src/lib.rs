//! # transfer-dl
//!
//! Transfer orchestration engine: one admission-controlled queue for direct
//! HTTP downloads, BitTorrent transfers and debrid-resolved links, with stall
//! recovery and exactly-once extraction of completed (multi-part) archives.
//!
//! ## Design Philosophy
//!
//! transfer-dl is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Engine-agnostic** - The HTTP engine and the peer-to-peer library are
//!   supplied by the host through [`DownloadEngine`] and [`TorrentBackend`]
//! - **Crash-tolerant** - Extraction and torrent sessions live in workers that
//!   may die and are relaunched on the next request
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use transfer_dl::{Config, Engines, NewTransfer, TransferManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = TransferManager::new(Config::default(), Engines::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     manager
//!         .add(NewTransfer {
//!             source: "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567".into(),
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     transfer_dl::run_with_shutdown(manager).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Archive naming and extraction dispatch
pub mod archive;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Debrid link resolution
pub mod debrid;
/// Engine ports (commands and signals)
pub mod engine;
/// Error types
pub mod error;
/// Archive extraction worker
pub mod extraction;
/// Public manager handle and control loop
pub mod manager;
/// Transfer queue scheduler
pub mod scheduler;
/// Throughput estimation
pub mod speed;
/// Transfer record store
pub mod store;
/// Torrent engine gateway and worker
pub mod torrent;
/// Core types and events
pub mod types;
/// Out-of-process worker plumbing
pub mod worker;

// Re-export commonly used types
pub use archive::{ArchiveCoalescer, ArchiveKeyState, Decision, ExtractionJob};
pub use config::{Config, DebridConfig, DownloadConfig, ExtractionConfig, TorrentConfig};
pub use db::Database;
pub use debrid::{DebridResolver, HttpDebridResolver};
pub use engine::{
    DownloadEngine, EngineCommand, EngineSignal, EngineState, FinishOutcome, SignalSink,
    TransferTarget,
};
pub use error::{DatabaseError, Error, ExtractionError, Result, TransferError, WorkerError};
pub use manager::{Engines, TransferManager, run_with_shutdown};
pub use scheduler::{Scheduler, SchedulerSettings};
pub use speed::SpeedEstimator;
pub use store::{TransferPersistence, TransferStore};
pub use torrent::{TorrentBackend, TorrentGateway, TorrentWorker};
pub use types::{Event, NewTransfer, Status, TransferId, TransferKind, TransferRecord};
pub use worker::{WorkerGateway, WorkerKind};

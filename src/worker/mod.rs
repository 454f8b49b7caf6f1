//! Out-of-process workers
//!
//! Long-running or crash-prone work (archive decoding, the peer-to-peer
//! engine) runs in workers that communicate with the host only through
//! messages:
//! - [`protocol`] - the JSON message shapes
//! - [`transport`] - launching workers as tasks or child processes
//! - [`WorkerGateway`] - correlation ids, deadlines, readiness and crash handling
//! - [`stdio`] - serving a worker body over stdin/stdout

mod gateway;
pub mod protocol;
pub mod stdio;
pub mod transport;

pub use gateway::{EventHandler, WorkerGateway};
pub use protocol::{
    READY_EVENT, WORKER_EXIT_EVENT, WorkerEvent, WorkerMessage, WorkerRequest, WorkerResponse,
};
pub use transport::{
    InProcessLauncher, ProcessLauncher, WorkerChannels, WorkerContext, WorkerLauncher,
    WorkerOutbox,
};

use serde::{Deserialize, Serialize};

/// Which worker a gateway drives
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerKind {
    /// Archive extraction worker
    Extraction,
    /// Peer-to-peer transfer engine
    TorrentEngine,
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerKind::Extraction => f.write_str("extraction"),
            WorkerKind::TorrentEngine => f.write_str("torrent-engine"),
        }
    }
}

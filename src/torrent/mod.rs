//! Torrent engine gateway
//!
//! The peer-to-peer library is a host-supplied [`TorrentBackend`]. A
//! [`TorrentWorker`] owns every session of that library and speaks the worker
//! protocol; the manager talks to it only through a [`TorrentGateway`]:
//!
//! - `add` resolves on acceptance, `torrent-metadata` arrives later
//! - `pause` destroys the session but keeps its locator, `resume` reopens it
//! - `torrent-progress` is reported per session on a fixed interval
//! - `torrent-done` tears the session down unless seeding is enabled
//!
//! With seeding disabled every peer is choked and throttled to zero upload.

mod backend;
mod client;
pub mod protocol;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use backend::{
    OpenedSession, PeerWire, ResolvedMetadata, SessionEvent, SessionStats, TorrentBackend,
    TorrentSession,
};
pub use client::TorrentGateway;
pub use protocol::{TorrentCommand, TorrentDone, TorrentFailure, TorrentMetadata, TorrentProgress};
pub use worker::TorrentWorker;

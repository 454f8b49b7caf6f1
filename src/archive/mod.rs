//! Archive completion coalescing
//!
//! When a transfer completes, the [`ArchiveCoalescer`] decides whether an
//! extraction job should run. Single archives extract as soon as they land;
//! multi-part sets wait until every part `1..=N` is present and completed, then
//! dispatch exactly one job for the whole group.
//!
//! Dispatched and finished work is remembered as an archive key
//! ([`ArchiveKeyState`]) in the [`TransferStore`](crate::store::TransferStore),
//! which persists it, so duplicate completion signals and restarts never
//! produce a second extraction.

mod classify;
mod coalescer;

pub use classify::{
    ArchiveKind, archive_key_for, classify, group_key, group_key_for, output_dir, single_key,
};
pub use coalescer::{ArchiveCoalescer, ArchiveGroup, Decision, ExtractionJob, GroupState};

use serde::{Deserialize, Serialize};

/// Persisted state of an archive key
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKeyState {
    /// A job was dispatched and has not reported back
    InFlight,
    /// Extraction finished successfully
    Done,
}

impl ArchiveKeyState {
    /// Stable name used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveKeyState::InFlight => "in_flight",
            ArchiveKeyState::Done => "done",
        }
    }

    /// Parse the database name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "in_flight" => Some(ArchiveKeyState::InFlight),
            "done" => Some(ArchiveKeyState::Done),
            _ => None,
        }
    }
}

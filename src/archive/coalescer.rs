//! Exactly-once extraction dispatch for completed archives.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use super::ArchiveKeyState;
use super::classify::{ArchiveKind, archive_key_for, classify, group_key, single_key};
use crate::store::TransferStore;
use crate::types::{Status, TransferId, TransferRecord};

/// Extraction state of a multi-part group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupState {
    /// No job has been dispatched yet
    NotStarted,
    /// A job is running
    InFlight,
    /// Extraction finished successfully
    Done,
}

impl From<Option<ArchiveKeyState>> for GroupState {
    fn from(state: Option<ArchiveKeyState>) -> Self {
        match state {
            None => GroupState::NotStarted,
            Some(ArchiveKeyState::InFlight) => GroupState::InFlight,
            Some(ArchiveKeyState::Done) => GroupState::Done,
        }
    }
}

/// Snapshot of one multi-part set, built from the store
#[derive(Clone, Debug)]
pub struct ArchiveGroup {
    /// Group key
    pub key: String,
    /// Base name shared by the parts
    pub base: String,
    /// Part number -> completed flag (true once any record for that part completed)
    pub parts: BTreeMap<u32, bool>,
    /// Extraction state
    pub state: GroupState,
}

impl ArchiveGroup {
    /// Collect every record of the store that belongs to `key`
    pub fn collect(store: &TransferStore, key: &str) -> Option<Self> {
        let mut base = None;
        let mut parts = BTreeMap::new();
        for record in store.iter() {
            let ArchiveKind::Part { base: b, index } = classify(&record.filename) else {
                continue;
            };
            if group_key(&record.destination, &b) != key {
                continue;
            }
            let completed = record.status == Status::Completed;
            let entry = parts.entry(index).or_insert(false);
            *entry |= completed;
            base.get_or_insert(b);
        }

        Some(Self {
            key: key.to_string(),
            base: base?,
            parts,
            state: store.archive_key(key).into(),
        })
    }

    /// Highest known part number
    pub fn expected_parts(&self) -> u32 {
        self.parts.keys().next_back().copied().unwrap_or(0)
    }

    /// Number of completed parts
    pub fn completed_parts(&self) -> usize {
        self.parts.values().filter(|done| **done).count()
    }

    /// Every part `1..=N` is present and completed
    pub fn is_ready(&self) -> bool {
        let expected = self.expected_parts();
        expected > 0 && (1..=expected).all(|i| self.parts.get(&i).copied().unwrap_or(false))
    }
}

/// One extraction to hand to the extraction worker
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractionJob {
    /// Archive key (single path key or group key)
    pub key: String,
    /// Entry point handed to the decoder (part 1 for multi-part sets)
    pub archive_path: PathBuf,
    /// Folder the archive extracts into
    pub out_dir: PathBuf,
    /// Records that move through `extracting` with this job
    pub members: Vec<TransferId>,
    /// Archive files owned by the members
    pub files: Vec<PathBuf>,
    /// Delete `files` after a successful extraction
    pub delete_after: bool,
}

/// What to do after a transfer completed
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// Not an archive
    NotArchive,
    /// Already dispatched or extracted; absorbed
    Duplicate,
    /// Multi-part set still missing parts
    Waiting {
        /// Group key
        key: String,
        /// Completed parts so far
        completed: usize,
        /// Highest known part number
        expected: u32,
    },
    /// Dispatch this job now
    Dispatch(ExtractionJob),
}

/// Decides when archives are extracted
///
/// Owned by the scheduler alongside the store it reads from.
#[derive(Debug, Default)]
pub struct ArchiveCoalescer {
    delete_after: bool,
    in_flight: HashMap<String, ExtractionJob>,
}

impl ArchiveCoalescer {
    /// Create a coalescer; `delete_after` removes archive files after success
    pub fn new(delete_after: bool) -> Self {
        Self {
            delete_after,
            in_flight: HashMap::new(),
        }
    }

    /// React to a completed transfer
    ///
    /// On [`Decision::Dispatch`] the key has already been recorded as in-flight
    /// in the store; the caller must send the job.
    pub fn on_completed(&mut self, store: &mut TransferStore, id: &TransferId) -> Decision {
        let Some(record) = store.get(id) else {
            return Decision::NotArchive;
        };

        match classify(&record.filename) {
            ArchiveKind::NotArchive => Decision::NotArchive,
            ArchiveKind::Single { stem } => {
                let path = record.file_path();
                let key = single_key(&path);
                if self.is_claimed(store, &key) {
                    tracing::debug!(transfer_id = %id, key = %key, "Archive already handled; ignoring completion");
                    return Decision::Duplicate;
                }
                let job = ExtractionJob {
                    key: key.clone(),
                    out_dir: record.destination.join(stem),
                    archive_path: path.clone(),
                    members: vec![*id],
                    files: vec![path],
                    delete_after: self.delete_after,
                };
                Decision::Dispatch(self.claim(store, job))
            }
            ArchiveKind::Part { base, .. } => {
                let key = group_key(&record.destination, &base);
                let out_dir = record.destination.join(&base);
                if self.is_claimed(store, &key) {
                    tracing::debug!(transfer_id = %id, key = %key, "Archive group already handled; ignoring completion");
                    return Decision::Duplicate;
                }

                let Some(group) = ArchiveGroup::collect(store, &key) else {
                    return Decision::NotArchive;
                };
                if !group.is_ready() {
                    tracing::info!(
                        key = %key,
                        completed = group.completed_parts(),
                        expected = group.expected_parts(),
                        "Waiting for remaining archive parts"
                    );
                    return Decision::Waiting {
                        key,
                        completed: group.completed_parts(),
                        expected: group.expected_parts(),
                    };
                }

                let (members, files): (Vec<TransferId>, Vec<PathBuf>) = group_members(store, &key)
                    .filter(|(r, _)| r.status == Status::Completed)
                    .map(|(r, _)| (r.id, r.file_path()))
                    .unzip();
                let Some(entry) = entry_point(store, &key, |r| r.status == Status::Completed)
                else {
                    return Decision::NotArchive;
                };
                let job = ExtractionJob {
                    key,
                    archive_path: entry,
                    out_dir,
                    members,
                    files,
                    delete_after: self.delete_after,
                };
                Decision::Dispatch(self.claim(store, job))
            }
        }
    }

    /// Finish an in-flight job
    ///
    /// Success records the key as done; failure clears it so an explicit
    /// re-add can extract again. Returns the job, or `None` for an unknown key.
    pub fn finish(
        &mut self,
        store: &mut TransferStore,
        key: &str,
        success: bool,
    ) -> Option<ExtractionJob> {
        let job = self.in_flight.remove(key)?;
        if success {
            store.set_archive_key(key, ArchiveKeyState::Done);
        } else {
            store.clear_archive_key(key);
        }
        Some(job)
    }

    /// In-flight job for a key
    pub fn job(&self, key: &str) -> Option<&ExtractionJob> {
        self.in_flight.get(key)
    }

    /// Number of in-flight jobs
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Rebuild jobs whose key was persisted in-flight before a restart
    ///
    /// Members still `extracting` are re-dispatched once. Keys with no
    /// extracting members left are cleared.
    pub fn resume_in_flight(&mut self, store: &mut TransferStore) -> Vec<ExtractionJob> {
        let keys: Vec<String> = store
            .archive_keys()
            .filter(|(_, state)| *state == ArchiveKeyState::InFlight)
            .map(|(key, _)| key.to_string())
            .collect();

        let mut jobs = Vec::new();
        for key in keys {
            if self.in_flight.contains_key(&key) {
                continue;
            }
            let extracting: Vec<&TransferRecord> = group_members(store, &key)
                .filter(|(r, _)| r.status == Status::Extracting)
                .map(|(r, _)| r)
                .collect();
            let entry = entry_point(store, &key, |r| r.status == Status::Extracting);
            let out_dir = extracting
                .first()
                .and_then(|r| super::output_dir(&r.destination, &r.filename));

            match (entry, out_dir) {
                (Some(archive_path), Some(out_dir)) => {
                    let job = ExtractionJob {
                        key: key.clone(),
                        archive_path,
                        out_dir,
                        members: extracting.iter().map(|r| r.id).collect(),
                        files: extracting.iter().map(|r| r.file_path()).collect(),
                        delete_after: self.delete_after,
                    };
                    tracing::info!(key = %key, members = job.members.len(), "Re-dispatching interrupted extraction");
                    self.in_flight.insert(key, job.clone());
                    jobs.push(job);
                }
                _ => {
                    tracing::warn!(key = %key, "Dropping in-flight archive key with no extracting members");
                    store.clear_archive_key(&key);
                }
            }
        }
        jobs
    }

    fn is_claimed(&self, store: &TransferStore, key: &str) -> bool {
        self.in_flight.contains_key(key) || store.archive_key(key).is_some()
    }

    fn claim(&mut self, store: &mut TransferStore, job: ExtractionJob) -> ExtractionJob {
        store.set_archive_key(&job.key, ArchiveKeyState::InFlight);
        tracing::info!(
            key = %job.key,
            archive = %job.archive_path.display(),
            members = job.members.len(),
            "Dispatching extraction"
        );
        self.in_flight.insert(job.key.clone(), job.clone());
        job
    }
}

/// Records whose archive key equals `key`
fn group_members<'a>(
    store: &'a TransferStore,
    key: &'a str,
) -> impl Iterator<Item = (&'a TransferRecord, ArchiveKind)> + 'a {
    store.iter().filter_map(move |r| {
        let kind = classify(&r.filename);
        (archive_key_for(&r.destination, &r.filename).as_deref() == Some(key)).then_some((r, kind))
    })
}

/// Decoder entry point: part 1 for sets, the file itself for singles
fn entry_point<F>(store: &TransferStore, key: &str, eligible: F) -> Option<PathBuf>
where
    F: Fn(&TransferRecord) -> bool,
{
    group_members(store, key)
        .filter(|(r, _)| eligible(r))
        .find(|(_, kind)| match kind {
            ArchiveKind::Part { index, .. } => *index == 1,
            ArchiveKind::Single { .. } => true,
            ArchiveKind::NotArchive => false,
        })
        .map(|(r, _)| r.file_path())
}

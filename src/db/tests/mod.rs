
use crate::types::{Status, TransferId, TransferKind, TransferRecord};
use std::path::PathBuf;

/// Build a record with sensible defaults for database tests
pub(super) fn sample_record(filename: &str) -> TransferRecord {
    TransferRecord {
        id: TransferId::new(),
        kind: TransferKind::Http,
        filename: filename.to_string(),
        source: format!("https://example.com/{filename}"),
        destination: PathBuf::from("/downloads"),
        total_bytes: Some(1024),
        transferred_bytes: 0,
        uploaded_bytes: 0,
        status: Status::Pending,
        speed_bps: 0.0,
        group: None,
        extraction: None,
        error: None,
        info_hash: None,
        resume_token: None,
        trackers: vec![],
        created_at: chrono::Utc::now().timestamp(),
        started_at: None,
        completed_at: None,
    }
}

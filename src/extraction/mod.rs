//! Archive extraction
//!
//! Extraction runs in a worker so a crashing or hanging decoder never takes
//! the manager down:
//! - [`ExtractionClient`] - host side; sends `extract` jobs through a
//!   [`WorkerGateway`](crate::worker::WorkerGateway) and routes progress
//! - [`run_extraction_worker`] - worker side; decodes archives on blocking
//!   threads and reports `extract-progress` events
//!
//! RAR, 7z and ZIP archives are supported, including `.partN.rar` volume sets
//! and raw-split `.7z.NNN` / `.zip.NNN` volumes (joined before decoding).

mod client;
mod rar;
mod service;
mod sevenz;
mod zip;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use client::ExtractionClient;
pub use rar::RarExtractor;
pub use service::{
    EXTRACT_PROGRESS_EVENT, ExtractProgress, ExtractResult, ExtractStatus, ExtractionCommand,
    run_extraction_worker,
};
pub use sevenz::SevenZipExtractor;
pub use zip::ZipExtractor;

use crate::archive::{ArchiveKind, classify};
use crate::error::ExtractionError;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

/// Archive container format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// RAR (single or `.partN.rar` volumes)
    Rar,
    /// 7-Zip
    SevenZip,
    /// ZIP
    Zip,
}

/// How the decoder should open an archive path
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchiveLayout {
    /// Container format
    pub format: ArchiveFormat,
    /// Raw-split volumes (`.7z.NNN`, `.zip.NNN`) that must be joined first
    pub split: bool,
}

/// Detect format and layout from the file name
pub fn detect_archive_layout(path: &Path) -> Option<ArchiveLayout> {
    let name = path.file_name()?.to_str()?;
    let lower = name.to_ascii_lowercase();

    match classify(name) {
        ArchiveKind::NotArchive => None,
        ArchiveKind::Part { .. } if lower.ends_with(".rar") => Some(ArchiveLayout {
            format: ArchiveFormat::Rar,
            split: false,
        }),
        ArchiveKind::Part { .. } => {
            let head = &lower[..lower.rfind('.')?];
            let format = if head.ends_with(".7z") {
                ArchiveFormat::SevenZip
            } else {
                ArchiveFormat::Zip
            };
            Some(ArchiveLayout {
                format,
                split: true,
            })
        }
        ArchiveKind::Single { .. } => {
            let format = match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
                "rar" => ArchiveFormat::Rar,
                "7z" => ArchiveFormat::SevenZip,
                _ => ArchiveFormat::Zip,
            };
            Some(ArchiveLayout {
                format,
                split: false,
            })
        }
    }
}

/// Extract `archive_path` into `dest_path`, blocking the calling thread
///
/// Returns the extracted files. Split volumes are joined into a temporary file
/// next to the first volume, which is removed afterwards.
pub fn extract_archive(
    archive_path: &Path,
    dest_path: &Path,
    on_progress: &dyn Fn(f32),
) -> Result<Vec<PathBuf>, ExtractionError> {
    let layout = detect_archive_layout(archive_path)
        .ok_or_else(|| ExtractionError::UnsupportedArchive(archive_path.to_path_buf()))?;

    if !archive_path.exists() {
        return Err(ExtractionError::MissingVolume {
            archive: archive_path.to_path_buf(),
            volume: archive_path.to_path_buf(),
        });
    }

    if !layout.split {
        return decode(layout.format, archive_path, dest_path, on_progress);
    }

    let joined = join_split_volumes(archive_path)?;
    let result = decode(layout.format, &joined, dest_path, on_progress);
    if let Err(e) = std::fs::remove_file(&joined) {
        tracing::warn!(path = ?joined, error = %e, "failed to remove joined volume file");
    }
    result
}

fn decode(
    format: ArchiveFormat,
    archive_path: &Path,
    dest_path: &Path,
    on_progress: &dyn Fn(f32),
) -> Result<Vec<PathBuf>, ExtractionError> {
    match format {
        ArchiveFormat::Rar => RarExtractor::extract(archive_path, dest_path, on_progress),
        ArchiveFormat::SevenZip => SevenZipExtractor::extract(archive_path, dest_path, on_progress),
        ArchiveFormat::Zip => ZipExtractor::extract(archive_path, dest_path, on_progress),
    }
}

/// Concatenate `name.ext.001`, `name.ext.002`, ... into `name.ext`-like temp file
///
/// Volumes are read in order until the first missing number. The first volume
/// must be the one passed in.
pub fn join_split_volumes(first_volume: &Path) -> Result<PathBuf, ExtractionError> {
    let name = first_volume
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ExtractionError::UnsupportedArchive(first_volume.to_path_buf()))?;
    let dot = name
        .rfind('.')
        .ok_or_else(|| ExtractionError::UnsupportedArchive(first_volume.to_path_buf()))?;
    let (stem, digits) = (&name[..dot], &name[dot + 1..]);
    let width = digits.len();

    let volume_path = |n: usize| first_volume.with_file_name(format!("{stem}.{n:0width$}"));
    let joined = first_volume.with_file_name(format!(".{stem}.joined"));

    let first = volume_path(1);
    if !first.exists() {
        return Err(ExtractionError::MissingVolume {
            archive: first_volume.to_path_buf(),
            volume: first,
        });
    }

    let io_failed = |e: std::io::Error| ExtractionError::Failed {
        archive: first_volume.to_path_buf(),
        reason: format!("failed to join volumes: {}", e),
    };

    let mut out = File::create(&joined).map_err(io_failed)?;
    let mut volumes = 0usize;
    loop {
        let volume = volume_path(volumes + 1);
        if !volume.exists() {
            break;
        }
        let mut input = File::open(&volume).map_err(io_failed)?;
        std::io::copy(&mut input, &mut out).map_err(io_failed)?;
        volumes += 1;
    }

    info!(archive = ?first_volume, volumes, "joined split volumes");
    Ok(joined)
}

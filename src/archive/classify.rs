//! Archive naming conventions.
//!
//! Completed files are sorted into three buckets:
//! - `movie.zip`, `movie.rar`, `movie.7z` - a single archive
//! - `movie.part1.rar`, `movie.part01.rar` - numbered RAR volumes
//! - `movie.7z.001`, `movie.zip.001` - split 7z/zip volumes
//!
//! Everything else is not an archive. Matching is case-insensitive.

use std::path::{Path, PathBuf};

/// What a completed filename is
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    /// Not an archive; nothing to extract
    NotArchive,
    /// A self-contained archive
    Single {
        /// File name without the archive extension
        stem: String,
    },
    /// One numbered part of a multi-part archive
    Part {
        /// Shared base name of the set (original case)
        base: String,
        /// 1-based part number
        index: u32,
    },
}

const SINGLE_EXTENSIONS: [&str; 3] = [".zip", ".rar", ".7z"];
const SPLIT_EXTENSIONS: [&str; 2] = [".7z", ".zip"];

/// Classify a filename
pub fn classify(filename: &str) -> ArchiveKind {
    let lower = filename.to_ascii_lowercase();

    // New-style RAR volumes: name.partN.rar
    if let Some(stem) = lower.strip_suffix(".rar")
        && let Some(part_idx) = stem.rfind(".part")
    {
        let digits = &stem[part_idx + 5..];
        if let Some(index) = parse_part_number(digits) {
            return ArchiveKind::Part {
                base: filename[..part_idx].to_string(),
                index,
            };
        }
    }

    // Split volumes: name.7z.NNN, name.zip.NNN
    if let Some(dot) = lower.rfind('.') {
        let digits = &lower[dot + 1..];
        let head = &lower[..dot];
        if let Some(index) = parse_part_number(digits)
            && let Some(ext) = SPLIT_EXTENSIONS.iter().find(|ext| head.ends_with(**ext))
        {
            return ArchiveKind::Part {
                base: filename[..dot - ext.len()].to_string(),
                index,
            };
        }
    }

    for ext in SINGLE_EXTENSIONS {
        if lower.ends_with(ext) && lower.len() > ext.len() {
            return ArchiveKind::Single {
                stem: filename[..filename.len() - ext.len()].to_string(),
            };
        }
    }

    ArchiveKind::NotArchive
}

/// Parse an all-digit part number; `0` and empty strings are rejected
fn parse_part_number(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok().filter(|n| *n > 0)
}

/// Dedup key for a single archive: its normalized full path
pub fn single_key(path: &Path) -> String {
    format!("file:{}", normalize(path).display())
}

/// Group key for a multi-part set: destination directory + lower-cased base name
pub fn group_key(destination: &Path, base: &str) -> String {
    format!(
        "group:{}",
        normalize(destination).join(base.to_lowercase()).display()
    )
}

/// Group key for a file, or `None` when it is not a numbered part
pub fn group_key_for(destination: &Path, filename: &str) -> Option<String> {
    match classify(filename) {
        ArchiveKind::Part { base, .. } => Some(group_key(destination, &base)),
        _ => None,
    }
}

/// Dedup key for any archive file (group key for parts, path key for singles)
pub fn archive_key_for(destination: &Path, filename: &str) -> Option<String> {
    match classify(filename) {
        ArchiveKind::NotArchive => None,
        ArchiveKind::Single { .. } => Some(single_key(&destination.join(filename))),
        ArchiveKind::Part { base, .. } => Some(group_key(destination, &base)),
    }
}

/// Folder an archive extracts into: `destination/<base name>`
pub fn output_dir(destination: &Path, filename: &str) -> Option<PathBuf> {
    match classify(filename) {
        ArchiveKind::NotArchive => None,
        ArchiveKind::Single { stem } => Some(destination.join(stem)),
        ArchiveKind::Part { base, .. } => Some(destination.join(base)),
    }
}

/// Drop `.` components and trailing separators so equal paths compare equal
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}

use crate::error::ExtractionError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Archive extractor for 7z files
pub struct SevenZipExtractor;

impl SevenZipExtractor {
    /// Extract a 7z archive into `dest_path`
    ///
    /// The decoder offers no per-entry hook here, so progress jumps from 0 to
    /// 100 when it returns.
    pub fn extract(
        archive_path: &Path,
        dest_path: &Path,
        on_progress: &dyn Fn(f32),
    ) -> Result<Vec<PathBuf>, ExtractionError> {
        debug!(?archive_path, ?dest_path, "attempting 7z extraction");

        std::fs::create_dir_all(dest_path)
            .map_err(|e| failed(archive_path, format!("failed to create destination: {}", e)))?;

        on_progress(0.0);
        sevenz_rust::decompress_file(archive_path, dest_path)
            .map_err(|e| failed(archive_path, format!("failed to extract 7z archive: {}", e)))?;

        // Validate that all extracted files are within dest_path (path traversal protection)
        Self::validate_extracted_paths(dest_path, archive_path)?;
        let extracted_files = Self::collect_extracted_files(dest_path, archive_path)?;
        on_progress(100.0);

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "7z extraction successful"
        );
        Ok(extracted_files)
    }

    /// Validate that all extracted files are within the destination directory
    fn validate_extracted_paths(dest_path: &Path, archive_path: &Path) -> Result<(), ExtractionError> {
        let canonical_dest = dest_path.canonicalize().map_err(|e| {
            failed(
                archive_path,
                format!("failed to canonicalize destination path: {}", e),
            )
        })?;

        fn check_dir(
            dir: &Path,
            canonical_dest: &Path,
            archive_path: &Path,
        ) -> Result<(), ExtractionError> {
            let entries = std::fs::read_dir(dir)
                .map_err(|e| failed(archive_path, format!("failed to read directory: {}", e)))?;

            for entry in entries {
                let path = entry
                    .map_err(|e| failed(archive_path, format!("failed to read entry: {}", e)))?
                    .path();
                let canonical = path.canonicalize().map_err(|e| {
                    failed(
                        archive_path,
                        format!("failed to canonicalize extracted path: {}", e),
                    )
                })?;

                if !canonical.starts_with(canonical_dest) {
                    return Err(failed(
                        archive_path,
                        format!(
                            "path traversal detected: extracted file {:?} is outside destination",
                            canonical
                        ),
                    ));
                }

                if path.is_dir() {
                    check_dir(&path, canonical_dest, archive_path)?;
                }
            }
            Ok(())
        }

        check_dir(dest_path, &canonical_dest, archive_path)
    }

    /// Recursively collect all files (not directories) from a directory
    fn collect_extracted_files(
        dir: &Path,
        archive_path: &Path,
    ) -> Result<Vec<PathBuf>, ExtractionError> {
        let mut files = Vec::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            let entries = std::fs::read_dir(&current)
                .map_err(|e| failed(archive_path, format!("failed to read directory: {}", e)))?;
            for entry in entries {
                let path = entry
                    .map_err(|e| failed(archive_path, format!("failed to read entry: {}", e)))?
                    .path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }
}

fn failed(archive_path: &Path, reason: String) -> ExtractionError {
    ExtractionError::Failed {
        archive: archive_path.to_path_buf(),
        reason,
    }
}

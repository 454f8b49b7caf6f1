use crate::error::ExtractionError;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Archive extractor for RAR files (single and `.partN.rar` volume sets)
pub struct RarExtractor;

impl RarExtractor {
    fn convert_unrar_error(e: unrar::error::UnrarError, archive_path: &Path) -> ExtractionError {
        ExtractionError::Failed {
            archive: archive_path.to_path_buf(),
            reason: e.to_string(),
        }
    }

    /// Count entries so progress can be reported; 0 when listing fails
    fn count_entries(archive_path: &Path) -> usize {
        match unrar::Archive::new(archive_path).open_for_listing() {
            Ok(listing) => listing.filter(|entry| entry.is_ok()).count(),
            Err(e) => {
                warn!(?archive_path, error = %e, "failed to list RAR entries");
                0
            }
        }
    }

    /// Extract a RAR archive into `dest_path`
    ///
    /// Multi-volume sets are opened from their first volume; `unrar` follows
    /// the remaining volumes on its own.
    pub fn extract(
        archive_path: &Path,
        dest_path: &Path,
        on_progress: &dyn Fn(f32),
    ) -> Result<Vec<PathBuf>, ExtractionError> {
        debug!(?archive_path, ?dest_path, "attempting RAR extraction");

        std::fs::create_dir_all(dest_path).map_err(|e| ExtractionError::Failed {
            archive: archive_path.to_path_buf(),
            reason: format!("failed to create destination: {}", e),
        })?;

        let total = Self::count_entries(archive_path);

        let processor = unrar::Archive::new(archive_path)
            .open_for_processing()
            .map_err(|e| Self::convert_unrar_error(e, archive_path))?;

        let mut extracted_files = Vec::new();
        let mut processed = 0usize;

        let mut at_header = processor;
        loop {
            let at_file = match at_header.read_header() {
                Ok(Some(entry_processor)) => entry_processor,
                Ok(None) => break,
                Err(e) => return Err(Self::convert_unrar_error(e, archive_path)),
            };

            let header = at_file.entry();

            // Sanitize filename to prevent path traversal attacks (e.g., "../../../etc/passwd")
            let sanitized = Path::new(&header.filename)
                .components()
                .filter(|c| matches!(c, std::path::Component::Normal(_)))
                .collect::<PathBuf>();

            if sanitized.as_os_str().is_empty() || header.is_directory() {
                at_header = at_file.skip().map_err(|e| ExtractionError::Failed {
                    archive: archive_path.to_path_buf(),
                    reason: format!("failed to skip entry: {}", e),
                })?;
            } else {
                let file_path = dest_path.join(&sanitized);
                at_header = at_file
                    .extract_to(&file_path)
                    .map_err(|e| Self::convert_unrar_error(e, archive_path))?;
                extracted_files.push(file_path);
            }

            processed += 1;
            if total > 0 {
                on_progress(((processed as f32 / total as f32) * 100.0).min(100.0));
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "RAR extraction successful"
        );

        Ok(extracted_files)
    }
}

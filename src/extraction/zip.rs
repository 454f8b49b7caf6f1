use crate::error::ExtractionError;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Archive extractor for ZIP files
pub struct ZipExtractor;

impl ZipExtractor {
    /// Extract a single ZIP entry to disk, creating directories as needed
    fn extract_zip_entry(
        mut file: zip::read::ZipFile,
        dest_path: &Path,
        archive_path: &Path,
    ) -> Result<Option<PathBuf>, ExtractionError> {
        let file_path = match file.enclosed_name() {
            Some(path) => dest_path.join(path),
            None => {
                warn!(entry = %file.name(), "skipping entry with unsafe path");
                return Ok(None);
            }
        };

        if file.is_dir() {
            std::fs::create_dir_all(&file_path)
                .map_err(|e| failed(archive_path, format!("failed to create directory: {}", e)))?;
            return Ok(None);
        }

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                failed(
                    archive_path,
                    format!("failed to create parent directories: {}", e),
                )
            })?;
        }

        let mut outfile = std::fs::File::create(&file_path)
            .map_err(|e| failed(archive_path, format!("failed to create output file: {}", e)))?;
        std::io::copy(&mut file, &mut outfile)
            .map_err(|e| failed(archive_path, format!("failed to extract file: {}", e)))?;

        Ok(Some(file_path))
    }

    /// Extract a ZIP archive into `dest_path`
    ///
    /// `on_progress` receives the percentage of entries processed.
    pub fn extract(
        archive_path: &Path,
        dest_path: &Path,
        on_progress: &dyn Fn(f32),
    ) -> Result<Vec<PathBuf>, ExtractionError> {
        debug!(?archive_path, ?dest_path, "attempting ZIP extraction");

        std::fs::create_dir_all(dest_path)
            .map_err(|e| failed(archive_path, format!("failed to create destination: {}", e)))?;

        let file = std::fs::File::open(archive_path)
            .map_err(|e| failed(archive_path, format!("failed to open ZIP archive: {}", e)))?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| failed(archive_path, format!("failed to read ZIP archive: {}", e)))?;

        let total = archive.len();
        let mut extracted_files = Vec::new();

        for i in 0..total {
            let file = archive
                .by_index(i)
                .map_err(|e| failed(archive_path, format!("failed to read ZIP entry: {}", e)))?;

            if let Some(file_path) = Self::extract_zip_entry(file, dest_path, archive_path)? {
                extracted_files.push(file_path);
            }
            on_progress(((i + 1) as f32 / total as f32) * 100.0);
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "ZIP extraction successful"
        );

        Ok(extracted_files)
    }
}

fn failed(archive_path: &Path, reason: String) -> ExtractionError {
    ExtractionError::Failed {
        archive: archive_path.to_path_buf(),
        reason,
    }
}

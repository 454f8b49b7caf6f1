use super::*;
use crate::archive::ExtractionJob;
use crate::error::WorkerError;
use crate::worker::InProcessLauncher;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Create a ZIP archive holding the given files
fn create_zip_archive(archive_path: &Path, files: &[(&str, &[u8])]) {
    let file = std::fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        std::io::Write::write_all(&mut writer, content).unwrap();
    }
    writer.finish().unwrap();
}

/// Create a 7z archive from a source directory
fn create_7z_archive(archive_path: &Path, source_dir: &Path) {
    sevenz_rust::compress_to_path(source_dir, archive_path).unwrap();
}

/// Split `archive` into `count` raw volumes `name.001`, `name.002`, ...
fn split_into_volumes(archive: &Path, count: usize) -> Vec<PathBuf> {
    let bytes = std::fs::read(archive).unwrap();
    let chunk = bytes.len().div_ceil(count);
    let mut volumes = Vec::new();
    for (i, part) in bytes.chunks(chunk).enumerate() {
        let name = format!(
            "{}.{:03}",
            archive.file_name().unwrap().to_str().unwrap(),
            i + 1
        );
        let path = archive.with_file_name(name);
        std::fs::write(&path, part).unwrap();
        volumes.push(path);
    }
    std::fs::remove_file(archive).unwrap();
    volumes
}

fn job_for(archive_path: &Path, out_dir: &Path) -> ExtractionJob {
    ExtractionJob {
        key: format!("file:{}", archive_path.display()),
        archive_path: archive_path.to_path_buf(),
        out_dir: out_dir.to_path_buf(),
        members: Vec::new(),
        files: vec![archive_path.to_path_buf()],
        delete_after: false,
    }
}

fn in_process_client() -> ExtractionClient {
    let launcher = InProcessLauncher::new(|ctx| run_extraction_worker(ctx).boxed());
    ExtractionClient::new(Arc::new(launcher), Duration::from_secs(5))
}

// ---------------------------------------------------------------------------
// Layout detection
// ---------------------------------------------------------------------------

#[test]
fn detect_layout_for_supported_names() {
    let layout = |name: &str| detect_archive_layout(Path::new(name));

    assert_eq!(
        layout("movie.rar"),
        Some(ArchiveLayout {
            format: ArchiveFormat::Rar,
            split: false
        })
    );
    assert_eq!(
        layout("Movie.PART01.rar"),
        Some(ArchiveLayout {
            format: ArchiveFormat::Rar,
            split: false
        })
    );
    assert_eq!(
        layout("backup.7z.001"),
        Some(ArchiveLayout {
            format: ArchiveFormat::SevenZip,
            split: true
        })
    );
    assert_eq!(
        layout("docs.zip.002"),
        Some(ArchiveLayout {
            format: ArchiveFormat::Zip,
            split: true
        })
    );
    assert_eq!(
        layout("photos.7z"),
        Some(ArchiveLayout {
            format: ArchiveFormat::SevenZip,
            split: false
        })
    );
    assert_eq!(layout("notes.txt"), None);
    assert_eq!(layout("movie.mkv"), None);
}

// ---------------------------------------------------------------------------
// Direct extraction
// ---------------------------------------------------------------------------

#[test]
fn extract_zip_reports_files_and_progress() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("bundle.zip");
    create_zip_archive(
        &archive,
        &[("a.txt", b"alpha"), ("nested/b.txt", b"bravo")],
    );
    let out = temp.path().join("bundle");

    let seen = Mutex::new(Vec::new());
    let files = extract_archive(&archive, &out, &|p| seen.lock().unwrap().push(p)).unwrap();

    assert_eq!(files.len(), 2);
    assert_eq!(std::fs::read(out.join("a.txt")).unwrap(), b"alpha");
    assert_eq!(std::fs::read(out.join("nested/b.txt")).unwrap(), b"bravo");

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.last().copied(), Some(100.0));
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn extract_7z_archive() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::write(source.join("readme.txt"), b"seven").unwrap();

    let archive = temp.path().join("data.7z");
    create_7z_archive(&archive, &source);
    let out = temp.path().join("data");

    let files = extract_archive(&archive, &out, &|_| {}).unwrap();
    assert!(!files.is_empty());
    assert!(
        files
            .iter()
            .any(|f| f.file_name().and_then(|n| n.to_str()) == Some("readme.txt"))
    );
}

#[test]
fn split_zip_volumes_are_joined_before_decoding() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("large.zip");
    let payload = vec![7u8; 64 * 1024];
    create_zip_archive(&archive, &[("payload.bin", &payload)]);
    let volumes = split_into_volumes(&archive, 3);
    assert_eq!(volumes.len(), 3);

    let out = temp.path().join("large");
    extract_archive(&volumes[0], &out, &|_| {}).unwrap();

    assert_eq!(std::fs::read(out.join("payload.bin")).unwrap(), payload);
    // temporary joined file is cleaned up
    assert!(!temp.path().join(".large.zip.joined").exists());
    for volume in &volumes {
        assert!(volume.exists(), "source volumes are kept");
    }
}

#[test]
fn join_without_first_volume_reports_missing_volume() {
    let temp = TempDir::new().unwrap();
    let second = temp.path().join("set.7z.002");
    std::fs::write(&second, b"tail").unwrap();

    let err = join_split_volumes(&second).unwrap_err();
    match err {
        ExtractionError::MissingVolume { volume, .. } => {
            assert_eq!(volume, temp.path().join("set.7z.001"));
        }
        other => panic!("expected MissingVolume, got {other:?}"),
    }
}

#[test]
fn unsupported_and_missing_archives_are_rejected() {
    let temp = TempDir::new().unwrap();
    let text = temp.path().join("notes.txt");
    std::fs::write(&text, b"plain").unwrap();

    assert!(matches!(
        extract_archive(&text, temp.path(), &|_| {}),
        Err(ExtractionError::UnsupportedArchive(_))
    ));
    assert!(matches!(
        extract_archive(&temp.path().join("gone.zip"), temp.path(), &|_| {}),
        Err(ExtractionError::MissingVolume { .. })
    ));
}

#[test]
fn corrupt_zip_fails() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("broken.zip");
    std::fs::write(&archive, b"definitely not a zip").unwrap();

    let err = extract_archive(&archive, &temp.path().join("out"), &|_| {}).unwrap_err();
    assert!(matches!(err, ExtractionError::Failed { .. }));
}

// ---------------------------------------------------------------------------
// Worker protocol
// ---------------------------------------------------------------------------

#[test]
fn extract_command_wire_format() {
    let command = ExtractionCommand::Extract {
        archive_path: PathBuf::from("/dl/movie.part1.rar"),
        out_dir: PathBuf::from("/dl/movie"),
        job_key: "group:/dl/movie".into(),
    };
    let value = serde_json::to_value(&command).unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "type": "extract",
            "archivePath": "/dl/movie.part1.rar",
            "outDir": "/dl/movie",
            "jobKey": "group:/dl/movie",
        })
    );

    let progress = serde_json::to_value(ExtractProgress {
        job_key: "k".into(),
        status: ExtractStatus::Progress,
        percent: Some(50.0),
        message: None,
        extract_dir: None,
    })
    .unwrap();
    assert_eq!(
        progress,
        serde_json::json!({"jobKey": "k", "status": "progress", "percent": 50.0})
    );
}

#[test]
fn progress_statuses_on_the_wire() {
    let failed = serde_json::to_value(ExtractProgress {
        job_key: "k".into(),
        status: ExtractStatus::Error,
        percent: None,
        message: Some("crc mismatch".into()),
        extract_dir: None,
    })
    .unwrap();
    assert_eq!(
        failed,
        serde_json::json!({"jobKey": "k", "status": "error", "message": "crc mismatch"})
    );

    let done: ExtractProgress = serde_json::from_value(serde_json::json!({
        "jobKey": "k",
        "status": "done",
        "percent": 100.0,
        "extractDir": "/dl/movie",
    }))
    .unwrap();
    assert_eq!(done.status, ExtractStatus::Done);
    assert_eq!(done.extract_dir, Some(PathBuf::from("/dl/movie")));
    assert_eq!(done.message, None);

    assert!(serde_json::from_value::<ExtractStatus>(serde_json::json!("failed")).is_err());
}

#[tokio::test]
async fn worker_extracts_and_reports_progress() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("show.zip");
    create_zip_archive(&archive, &[("episode.mkv", b"frames")]);
    let out = temp.path().join("show");

    let client = in_process_client();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    client
        .on_progress(move |p| sink.lock().unwrap().push(p))
        .await;

    let job = job_for(&archive, &out);
    let dir = client.extract(&job, Duration::from_secs(30)).await.unwrap();

    assert_eq!(dir, out);
    assert_eq!(std::fs::read(out.join("episode.mkv")).unwrap(), b"frames");

    let events = events.lock().unwrap();
    assert_eq!(events.first().map(|e| e.status), Some(ExtractStatus::Progress));
    let last = events.last().unwrap();
    assert_eq!(last.status, ExtractStatus::Done);
    assert_eq!(last.extract_dir.as_deref(), Some(out.as_path()));
    assert!(events.iter().all(|e| e.job_key == job.key));
}

#[tokio::test]
async fn worker_failure_rejects_the_call() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("broken.zip");
    std::fs::write(&archive, b"garbage").unwrap();

    let client = in_process_client();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    client
        .on_progress(move |p| sink.lock().unwrap().push(p))
        .await;

    let err = client
        .extract(&job_for(&archive, &temp.path().join("out")), Duration::from_secs(30))
        .await
        .unwrap_err();

    let WorkerError::Failed(reason) = err else {
        panic!("expected a decoder failure, got {err:?}");
    };
    let events = events.lock().unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.status, ExtractStatus::Error);
    assert_eq!(last.message.as_deref(), Some(reason.as_str()));
}

#[tokio::test]
async fn worker_rejects_unknown_commands() {
    let client = in_process_client();
    client
        .gateway()
        .start(Duration::from_secs(5))
        .await
        .unwrap();

    let err = client
        .gateway()
        .call(
            &serde_json::json!({"type": "defragment"}),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
    match err {
        WorkerError::Failed(message) => assert!(message.contains("defragment")),
        other => panic!("expected Failed, got {other:?}"),
    }
}

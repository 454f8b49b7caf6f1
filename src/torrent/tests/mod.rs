use super::*;
use crate::config::TorrentConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Fake peer-to-peer library
// ---------------------------------------------------------------------------

struct FakeWire {
    choked: AtomicBool,
    upload_limit: AtomicU64,
}

impl FakeWire {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            choked: AtomicBool::new(false),
            upload_limit: AtomicU64::new(u64::MAX),
        })
    }

    fn is_silenced(&self) -> bool {
        self.choked.load(Ordering::SeqCst) && self.upload_limit.load(Ordering::SeqCst) == 0
    }
}

impl PeerWire for FakeWire {
    fn choke(&self) {
        self.choked.store(true, Ordering::SeqCst);
    }

    fn throttle_upload(&self, bytes_per_sec: u64) {
        self.upload_limit.store(bytes_per_sec, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        false
    }
}

struct FakeSessionState {
    locator: String,
    events: mpsc::UnboundedSender<SessionEvent>,
    stats: Mutex<SessionStats>,
    wires: Mutex<Vec<Arc<FakeWire>>>,
    destroyed: AtomicBool,
    deleted_files: AtomicBool,
}

impl FakeSessionState {
    fn send(&self, event: SessionEvent) {
        self.events.send(event).unwrap();
    }

    fn attach(&self, wire: Arc<FakeWire>) {
        self.wires.lock().unwrap().push(wire.clone());
        self.send(SessionEvent::WireAttached(wire));
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

struct FakeSession(Arc<FakeSessionState>);

#[async_trait]
impl TorrentSession for FakeSession {
    fn stats(&self) -> SessionStats {
        self.0.stats.lock().unwrap().clone()
    }

    fn wires(&self) -> Vec<Arc<dyn PeerWire>> {
        self.0
            .wires
            .lock()
            .unwrap()
            .iter()
            .map(|w| w.clone() as Arc<dyn PeerWire>)
            .collect()
    }

    async fn destroy(&self, delete_files: bool) {
        self.0.destroyed.store(true, Ordering::SeqCst);
        self.0.deleted_files.store(delete_files, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeBackend {
    sessions: Mutex<Vec<Arc<FakeSessionState>>>,
    fail_next: AtomicBool,
}

impl FakeBackend {
    fn locators(&self) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.locator.clone())
            .collect()
    }

    fn session(&self, index: usize) -> Arc<FakeSessionState> {
        self.sessions.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl TorrentBackend for FakeBackend {
    async fn open(
        &self,
        locator: &str,
        _destination: &Path,
        _trackers: &[String],
    ) -> Result<OpenedSession, String> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err("invalid torrent".to_string());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(FakeSessionState {
            locator: locator.to_string(),
            events: tx,
            stats: Mutex::new(SessionStats::default()),
            wires: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
            deleted_files: AtomicBool::new(false),
        });
        self.sessions.lock().unwrap().push(state.clone());
        Ok(OpenedSession {
            session: Box::new(FakeSession(state)),
            events: rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const MAGNET: &str = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567";

fn gateway_with(config: TorrentConfig) -> (TorrentGateway, Arc<FakeBackend>) {
    let backend = Arc::new(FakeBackend::default());
    let launcher = TorrentWorker::launcher(backend.clone(), config);
    let gateway = TorrentGateway::new(
        Arc::new(launcher),
        Duration::from_secs(5),
        Duration::from_secs(5),
    );
    (gateway, backend)
}

fn default_gateway() -> (TorrentGateway, Arc<FakeBackend>) {
    gateway_with(TorrentConfig::default())
}

fn metadata(content_path: PathBuf) -> SessionEvent {
    SessionEvent::Metadata(ResolvedMetadata {
        name: "Ubuntu ISO".to_string(),
        total_bytes: 4096,
        info_hash: "0123456789abcdef0123456789abcdef01234567".to_string(),
        content_path,
    })
}

async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn add_resolves_before_metadata() {
    let (gateway, backend) = default_gateway();
    let (tx, mut rx) = mpsc::unbounded_channel();
    gateway.on_metadata(move |m| tx.send(m).unwrap()).await;

    gateway
        .add("t1", MAGNET, Path::new("/downloads"), &[])
        .await
        .unwrap();
    assert_eq!(backend.locators(), vec![MAGNET.to_string()]);

    backend.session(0).send(metadata(PathBuf::from("/downloads/ubuntu.iso")));
    let event = next(&mut rx).await;
    assert_eq!(event.torrent_id, "t1");
    assert_eq!(event.name, "Ubuntu ISO");
    assert_eq!(event.total_bytes, 4096);
}

#[tokio::test(start_paused = true)]
async fn add_reports_backend_failure() {
    let (gateway, backend) = default_gateway();
    backend.fail_next.store(true, Ordering::SeqCst);

    let err = gateway
        .add("t1", MAGNET, Path::new("/downloads"), &[])
        .await
        .unwrap_err();
    assert_eq!(err, crate::error::WorkerError::Failed("invalid torrent".into()));

    // the entry is kept, so a resume retries the open
    gateway.resume("t1").await.unwrap();
    assert_eq!(backend.locators().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn wires_are_choked_on_attach_when_seeding_disabled() {
    let (gateway, backend) = gateway_with(TorrentConfig {
        rechoke_interval: Duration::from_secs(3600),
        ..Default::default()
    });
    gateway
        .add("t1", MAGNET, Path::new("/downloads"), &[])
        .await
        .unwrap();

    let wire = FakeWire::new();
    backend.session(0).attach(wire.clone());
    eventually(|| wire.is_silenced()).await;
}

#[tokio::test(start_paused = true)]
async fn wires_are_rechoked_periodically() {
    let (gateway, backend) = gateway_with(TorrentConfig {
        rechoke_interval: Duration::from_secs(5),
        ..Default::default()
    });
    gateway
        .add("t1", MAGNET, Path::new("/downloads"), &[])
        .await
        .unwrap();

    let wire = FakeWire::new();
    backend.session(0).attach(wire.clone());
    eventually(|| wire.is_silenced()).await;

    // the library unchokes the peer behind our back
    wire.choked.store(false, Ordering::SeqCst);
    wire.upload_limit.store(u64::MAX, Ordering::SeqCst);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(wire.is_silenced());
}

#[tokio::test(start_paused = true)]
async fn seeding_enabled_leaves_wires_alone() {
    let (gateway, backend) = gateway_with(TorrentConfig {
        seeding_enabled: true,
        rechoke_interval: Duration::from_secs(1),
        ..Default::default()
    });
    gateway
        .add("t1", MAGNET, Path::new("/downloads"), &[])
        .await
        .unwrap();

    let wire = FakeWire::new();
    backend.session(0).attach(wire.clone());
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!wire.choked.load(Ordering::SeqCst));

    gateway.set_seeding(false).await.unwrap();
    assert!(wire.is_silenced());
}

#[tokio::test(start_paused = true)]
async fn progress_hides_uploads_when_seeding_disabled() {
    let (gateway, backend) = default_gateway();
    let (tx, mut rx) = mpsc::unbounded_channel();
    gateway.on_progress(move |p| tx.send(p).unwrap()).await;

    gateway
        .add("t1", MAGNET, Path::new("/downloads"), &[])
        .await
        .unwrap();
    *backend.session(0).stats.lock().unwrap() = SessionStats {
        downloaded: 2048,
        uploaded: 512,
        progress: 0.5,
        download_speed: 100.0,
        upload_speed: 25.0,
        peers: 4,
    };

    let progress = loop {
        let p = next(&mut rx).await;
        if p.downloaded == 2048 {
            break p;
        }
    };
    assert_eq!(progress.torrent_id, "t1");
    assert_eq!(progress.uploaded, 0);
    assert_eq!(progress.upload_speed, 0.0);
    assert_eq!(progress.peers, 4);
}

#[tokio::test(start_paused = true)]
async fn done_tears_session_down_without_seeding() {
    let (gateway, backend) = default_gateway();
    let (tx, mut rx) = mpsc::unbounded_channel();
    gateway.on_done(move |d| tx.send(d).unwrap()).await;

    gateway
        .add("t1", MAGNET, Path::new("/downloads"), &[])
        .await
        .unwrap();
    let session = backend.session(0);
    session.send(metadata(PathBuf::from("/downloads/ubuntu.iso")));
    session.send(SessionEvent::Done);

    let done = next(&mut rx).await;
    assert_eq!(done.torrent_id, "t1");
    assert_eq!(done.path, Some(PathBuf::from("/downloads/ubuntu.iso")));
    eventually(|| session.is_destroyed()).await;
    assert!(!session.deleted_files.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn done_keeps_session_when_seeding() {
    let (gateway, backend) = gateway_with(TorrentConfig {
        seeding_enabled: true,
        ..Default::default()
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    gateway.on_done(move |d| tx.send(d).unwrap()).await;

    gateway
        .add("t1", MAGNET, Path::new("/downloads"), &[])
        .await
        .unwrap();
    backend.session(0).send(SessionEvent::Done);
    next(&mut rx).await;

    // round trip through the worker loop
    gateway.resume("t1").await.unwrap();
    assert!(!backend.session(0).is_destroyed());
}

#[tokio::test(start_paused = true)]
async fn pause_keeps_resolved_locator_for_resume() {
    let (gateway, backend) = default_gateway();
    let (tx, mut rx) = mpsc::unbounded_channel();
    gateway.on_metadata(move |m| tx.send(m).unwrap()).await;

    gateway
        .add("t1", "/torrents/ubuntu.torrent", Path::new("/downloads"), &[])
        .await
        .unwrap();
    backend.session(0).send(metadata(PathBuf::from("/downloads/ubuntu.iso")));
    next(&mut rx).await;

    gateway.pause("t1").await.unwrap();
    assert!(backend.session(0).is_destroyed());

    gateway.resume("t1").await.unwrap();
    assert_eq!(
        backend.locators(),
        vec![
            "/torrents/ubuntu.torrent".to_string(),
            "0123456789abcdef0123456789abcdef01234567".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn magnet_locator_survives_pause() {
    let (gateway, backend) = default_gateway();
    gateway
        .add("t1", MAGNET, Path::new("/downloads"), &[])
        .await
        .unwrap();
    gateway.pause("t1").await.unwrap();
    gateway.resume("t1").await.unwrap();
    assert_eq!(backend.locators(), vec![MAGNET.to_string(), MAGNET.to_string()]);
}

#[tokio::test]
async fn remove_without_session_deletes_known_content() {
    let temp = tempfile::TempDir::new().unwrap();
    let content = temp.path().join("ubuntu");
    std::fs::create_dir_all(&content).unwrap();
    std::fs::write(content.join("ubuntu.iso"), b"iso").unwrap();

    let (gateway, backend) = default_gateway();
    let (tx, mut rx) = mpsc::unbounded_channel();
    gateway.on_metadata(move |m| tx.send(m).unwrap()).await;

    gateway.add("t1", MAGNET, temp.path(), &[]).await.unwrap();
    backend.session(0).send(metadata(content.clone()));
    next(&mut rx).await;
    gateway.pause("t1").await.unwrap();

    gateway.remove("t1", true).await.unwrap();
    assert!(!content.exists());
}

#[tokio::test(start_paused = true)]
async fn remove_live_session_forwards_delete_flag() {
    let (gateway, backend) = default_gateway();
    gateway
        .add("t1", MAGNET, Path::new("/downloads"), &[])
        .await
        .unwrap();

    gateway.remove("t1", true).await.unwrap();
    let session = backend.session(0);
    assert!(session.is_destroyed());
    assert!(session.deleted_files.load(Ordering::SeqCst));

    // unknown ids are fine
    gateway.remove("t1", true).await.unwrap();
    assert!(gateway.pause("t1").await.is_err());
}

#[tokio::test(start_paused = true)]
async fn engine_error_is_reported_and_session_dropped() {
    let (gateway, backend) = default_gateway();
    let (tx, mut rx) = mpsc::unbounded_channel();
    gateway.on_error(move |e| tx.send(e).unwrap()).await;

    gateway
        .add("t1", MAGNET, Path::new("/downloads"), &[])
        .await
        .unwrap();
    backend
        .session(0)
        .send(SessionEvent::Error("tracker unreachable".into()));

    let failure = next(&mut rx).await;
    assert_eq!(failure.torrent_id, "t1");
    assert_eq!(failure.error, "tracker unreachable");
    eventually(|| backend.session(0).is_destroyed()).await;
}

#[tokio::test(start_paused = true)]
async fn stale_session_events_are_ignored() {
    let (gateway, backend) = default_gateway();
    let (tx, mut rx) = mpsc::unbounded_channel();
    gateway.on_done(move |d| tx.send(d).unwrap()).await;

    gateway
        .add("t1", MAGNET, Path::new("/downloads"), &[])
        .await
        .unwrap();
    let first = backend.session(0);
    gateway.pause("t1").await.unwrap();
    gateway.resume("t1").await.unwrap();

    // the destroyed session's forwarder is gone; a send is either dropped or ignored
    first.events.send(SessionEvent::Done).ok();
    backend.session(1).send(SessionEvent::Done);

    let done = next(&mut rx).await;
    assert_eq!(done.torrent_id, "t1");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rx.try_recv().is_err());
}

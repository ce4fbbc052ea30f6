use super::*;
use crate::test_helpers::FakeRecords;
use tempfile::TempDir;

const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

struct Fixture {
    manager: RetentionManager,
    status: StatusStore,
    records: Arc<FakeRecords>,
    media: PathBuf,
    _dir: TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let media = dir.path().join("music");
    std::fs::create_dir_all(&media).unwrap();

    let status = StatusStore::open(media.join(".download-state.json"))
        .await
        .unwrap();
    let records = Arc::new(FakeRecords::new());
    let manager = RetentionManager::new(
        status.clone(),
        records.clone(),
        ActivityLog::new(dir.path().join("logs")),
        &media,
        WEEK,
    );

    Fixture {
        manager,
        status,
        records,
        media,
        _dir: dir,
    }
}

fn write_artifact(media: &Path, name: &str, age: Duration) -> PathBuf {
    let path = media.join(name);
    std::fs::write(&path, b"audio").unwrap();
    let file = std::fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
    path
}

#[tokio::test]
async fn orphaned_artifact_is_deleted_and_cleared() {
    let f = fixture().await;
    let path = write_artifact(&f.media, "3.opus", Duration::from_secs(60));
    f.status.set(TrackId(3), AudioStatus::Ready).await;

    let report = f.manager.sweep().await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.orphaned, 1);
    assert!(!path.exists());
    assert!(f.status.snapshot().get(&TrackId(3)).is_none());
}

#[tokio::test]
async fn expired_artifact_is_deleted_but_record_kept() {
    let f = fixture().await;
    f.records.insert(TrackId(4), Some("https://example.com/d"));
    let path = write_artifact(&f.media, "4.opus", WEEK + Duration::from_secs(3600));
    f.status.set(TrackId(4), AudioStatus::Ready).await;

    let report = f.manager.sweep().await.unwrap();

    assert_eq!(report.expired, 1);
    assert!(!path.exists());
    assert!(f.status.snapshot().get(&TrackId(4)).is_none());
    assert!(f.records.record_exists(TrackId(4)).await.unwrap());
}

#[tokio::test]
async fn fresh_artifact_is_kept_and_forced_ready() {
    let f = fixture().await;
    f.records.insert(TrackId(5), Some("https://example.com/e"));
    let path = write_artifact(&f.media, "5.opus", Duration::from_secs(3600));
    f.status.set(TrackId(5), AudioStatus::server_restart()).await;

    let report = f.manager.sweep().await.unwrap();

    assert_eq!(report.healed, 1);
    assert!(path.exists());
    assert_eq!(f.status.get(TrackId(5)), AudioStatus::Ready);

    // Already ready: kept without being counted again
    let report = f.manager.sweep().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.healed, 0);
}

#[tokio::test]
async fn unrelated_files_are_ignored() {
    let f = fixture().await;
    write_artifact(&f.media, "cover.opus", Duration::ZERO);
    write_artifact(&f.media, "12.txt", WEEK * 2);
    write_artifact(&f.media, "notes", Duration::ZERO);
    std::fs::create_dir(f.media.join("7.opus")).unwrap();

    let report = f.manager.sweep().await.unwrap();

    assert_eq!(report, SweepReport::default());
    assert!(f.media.join("12.txt").exists());
    assert!(f.media.join("cover.opus").exists());
}

#[tokio::test]
async fn all_recognized_extensions_are_swept() {
    let f = fixture().await;
    for (i, ext) in ["opus", "webm", "M4A", "mp3"].iter().enumerate() {
        write_artifact(&f.media, &format!("{}.{ext}", i + 1), Duration::ZERO);
    }

    let report = f.manager.sweep().await.unwrap();

    assert_eq!(report.scanned, 4);
    assert_eq!(report.orphaned, 4);
}

#[tokio::test]
async fn record_lookup_failure_keeps_file_and_continues() {
    let f = fixture().await;
    f.records.break_lookups(TrackId(1));
    let kept = write_artifact(&f.media, "1.opus", Duration::ZERO);
    let orphan = write_artifact(&f.media, "2.opus", Duration::ZERO);

    let report = f.manager.sweep().await.unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.orphaned, 1);
    assert!(kept.exists());
    assert!(!orphan.exists());
}

#[tokio::test]
async fn missing_media_directory_is_an_empty_sweep() {
    let f = fixture().await;
    std::fs::remove_dir_all(&f.media).unwrap();

    let report = f.manager.sweep().await.unwrap();
    assert_eq!(report, SweepReport::default());
}

#[tokio::test]
async fn periodic_task_sweeps_at_start_and_stops_on_shutdown() {
    let f = fixture().await;
    let path = write_artifact(&f.media, "9.opus", Duration::ZERO);
    let shutdown = CancellationToken::new();

    let handle = f
        .manager
        .spawn_periodic(Duration::from_secs(3600), shutdown.clone());

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while path.exists() {
        assert!(std::time::Instant::now() < deadline, "first sweep never ran");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

struct ScriptedListing(std::collections::VecDeque<std::io::Result<Option<u32>>>);

#[async_trait]
impl Listing for ScriptedListing {
    type Entry = u32;

    async fn next(&mut self) -> std::io::Result<Option<u32>> {
        self.0.pop_front().unwrap_or(Ok(None))
    }
}

fn listing_error() -> std::io::Result<Option<u32>> {
    Err(std::io::Error::other("stale NFS handle"))
}

#[tokio::test]
async fn unreadable_entries_are_counted_and_skipped() {
    let mut listing = ScriptedListing(
        vec![Ok(Some(1)), listing_error(), Ok(Some(2)), Ok(None)].into(),
    );
    let mut report = SweepReport::default();
    let mut seen = Vec::new();

    while let Some(entry) = next_listed(&mut listing, &mut report, Path::new("/m")).await {
        seen.push(entry);
    }

    assert_eq!(seen, vec![1, 2]);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn persistent_listing_errors_end_the_sweep() {
    let mut listing =
        ScriptedListing((0..100).map(|_| listing_error()).collect());
    let mut report = SweepReport::default();

    assert!(next_listed(&mut listing, &mut report, Path::new("/m")).await.is_none());
    assert_eq!(report.failed, MAX_LISTING_ERRORS);
}

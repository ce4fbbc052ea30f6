//! Shared fakes and builders for tests that need a running queue or pipeline.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::activity_log::ActivityLog;
use crate::config::{Config, QueueConfig};
use crate::error::{Error, Result};
use crate::media::{FetchRequest, MediaTools};
use crate::queue::{DownloadQueue, QueueDeps};
use crate::rate_limiter::RateLimiter;
use crate::records::{RecordStore, TrackRecord};
use crate::status_store::StatusStore;
use crate::types::{AudioStatus, TrackId};

/// Bytes written by the fake fetch
pub(crate) const FAKE_AUDIO: &[u8] = b"OggS fake audio";

/// In-process stand-in for yt-dlp + ffmpeg
///
/// Fetch writes `<output_dir>/<id>.webm`, transcode copies it to the output.
#[derive(Default)]
pub(crate) struct FakeMediaTools {
    fetch_calls: AtomicUsize,
    fail_remaining: AtomicUsize,
    hang: AtomicBool,
    progress_steps: Vec<f32>,
    step_delay: Duration,
    sources: Mutex<Vec<String>>,
}

impl FakeMediaTools {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` fetches
    pub(crate) fn failing(self, count: usize) -> Self {
        self.fail_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Report each of `steps` after waiting `delay`
    pub(crate) fn with_progress(mut self, steps: Vec<f32>, delay: Duration) -> Self {
        self.progress_steps = steps;
        self.step_delay = delay;
        self
    }

    /// Block every fetch until it is cancelled
    pub(crate) fn hanging(self) -> Self {
        self.hang.store(true, Ordering::SeqCst);
        self
    }

    /// Let blocked and future fetches complete
    pub(crate) fn unhang(&self) {
        self.hang.store(false, Ordering::SeqCst);
    }

    pub(crate) fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Source references passed to fetch, in call order
    pub(crate) fn sources(&self) -> Vec<String> {
        self.sources.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaTools for FakeMediaTools {
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: mpsc::UnboundedSender<f32>,
        cancel: CancellationToken,
    ) -> Result<PathBuf> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().unwrap().push(request.source_ref.clone());

        for step in &self.progress_steps {
            tokio::select! {
                _ = tokio::time::sleep(self.step_delay) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
            progress.send(*step).ok();
        }

        while self.hang.load(Ordering::SeqCst) {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(10)) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }

        let failed = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            // Leave a partial file behind like an interrupted download would
            tokio::fs::write(request.output_dir.join(format!("{}.webm", request.id)), b"part")
                .await?;
            return Err(Error::ExternalTool(
                "yt-dlp exited with exit status: 1".into(),
            ));
        }

        let path = request.output_dir.join(format!("{}.webm", request.id));
        tokio::fs::write(&path, FAKE_AUDIO).await?;
        Ok(path)
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        cancel: CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::fs::copy(input, output).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// In-memory record store
#[derive(Default)]
pub(crate) struct FakeRecords {
    records: Mutex<HashMap<TrackId, Option<String>>>,
    broken: Mutex<HashSet<TrackId>>,
}

impl FakeRecords {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, id: TrackId, source_ref: Option<&str>) {
        self.records
            .lock()
            .unwrap()
            .insert(id, source_ref.map(str::to_string));
    }

    pub(crate) fn remove(&self, id: TrackId) {
        self.records.lock().unwrap().remove(&id);
    }

    /// Make lookups of `id` fail
    pub(crate) fn break_lookups(&self, id: TrackId) {
        self.broken.lock().unwrap().insert(id);
    }
}

#[async_trait]
impl RecordStore for FakeRecords {
    async fn get_record(&self, id: TrackId) -> Result<Option<TrackRecord>> {
        if self.broken.lock().unwrap().contains(&id) {
            return Err(Error::Other(format!("lookup of record {id} failed")));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&id)
            .map(|source_ref| TrackRecord {
                id,
                source_ref: source_ref.clone(),
            }))
    }

    async fn record_ids(&self) -> Result<Vec<TrackId>> {
        let mut ids: Vec<TrackId> = self.records.lock().unwrap().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Config rooted in `dir` with fast retries
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.media_dir = dir.join("music");
    config.storage.temp_dir = dir.join("music").join(".partial");
    config.storage.log_dir = dir.join("logs");
    config.records.database_path = dir.join("songs.db");
    config.queue.retry_delay = Duration::from_millis(10);
    config
}

/// Queue, its status store and the scratch directory (keep it alive)
pub(crate) struct TestQueue {
    pub(crate) queue: DownloadQueue,
    pub(crate) status: StatusStore,
    pub(crate) activity: ActivityLog,
    pub(crate) config: Config,
    pub(crate) dir: TempDir,
}

impl TestQueue {
    pub(crate) fn artifact(&self, id: TrackId) -> PathBuf {
        self.config.storage.artifact_path(id)
    }
}

pub(crate) async fn create_test_queue(
    tools: Arc<FakeMediaTools>,
    queue_config: QueueConfig,
) -> TestQueue {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.queue = queue_config;

    std::fs::create_dir_all(&config.storage.media_dir).unwrap();
    std::fs::create_dir_all(&config.storage.temp_dir).unwrap();

    let status = StatusStore::open(config.storage.ledger_path()).await.unwrap();
    let activity = ActivityLog::new(&config.storage.log_dir);
    let queue = DownloadQueue::new(
        QueueDeps {
            status: status.clone(),
            limiter: RateLimiter::from_config(&config.rate_limit),
            tools,
            activity: activity.clone(),
            temp_dir: config.storage.temp_dir.clone(),
        },
        config.queue.clone(),
    );

    TestQueue {
        queue,
        status,
        activity,
        config,
        dir,
    }
}

/// Fast retry settings for queue tests
pub(crate) fn fast_retries(max_retries: u32) -> QueueConfig {
    QueueConfig {
        max_retries,
        retry_delay: Duration::from_millis(10),
    }
}

/// Poll until `id`'s status satisfies `done`, panicking after `timeout`
pub(crate) async fn wait_for_status(
    status: &StatusStore,
    id: TrackId,
    timeout: Duration,
    done: impl Fn(&AudioStatus) -> bool,
) -> AudioStatus {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let current = status.get(id);
        if done(&current) {
            return current;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for track {id}, last status {current:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the queue has no processing loop
pub(crate) async fn wait_until_idle(queue: &DownloadQueue, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while queue.is_busy() {
        if tokio::time::Instant::now() >= deadline {
            panic!("queue still busy after {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

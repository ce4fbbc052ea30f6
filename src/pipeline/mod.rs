//! The audio pipeline service object
//!
//! [`AudioPipeline`] is built once at startup and owns every component:
//! - `lifecycle` - background tasks and graceful shutdown
//! - `tracks` - per-track operations used by the HTTP layer and record hooks
//!
//! It is cheap to clone; clones share all state.

mod lifecycle;
mod tracks;


use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::activity_log::ActivityLog;
use crate::config::Config;
use crate::disk_guard::{DiskGuard, SystemProbe};
use crate::error::Result;
use crate::media::{CliMediaTools, MediaTools};
use crate::queue::{DownloadQueue, QueueDeps};
use crate::rate_limiter::RateLimiter;
use crate::records::{RecordStore, SqliteRecordStore};
use crate::retention::RetentionManager;
use crate::status_store::StatusStore;

/// Fetches, transcodes, tracks and reclaims audio artifacts for catalog records
///
/// # Examples
///
/// ```no_run
/// use track_fetch::{AudioPipeline, Config};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = AudioPipeline::connect(Config::default()).await?;
/// pipeline.start_background_tasks();
///
/// let status = pipeline.status(42.into()).await;
/// println!("track 42: {:?}", status.status);
///
/// pipeline.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AudioPipeline {
    pub(crate) config: Arc<Config>,
    pub(crate) status: StatusStore,
    pub(crate) queue: DownloadQueue,
    pub(crate) retention: RetentionManager,
    pub(crate) disk_guard: DiskGuard,
    pub(crate) records: Arc<dyn RecordStore>,
    pub(crate) activity: ActivityLog,
    /// Parent token of every background task
    pub(crate) shutdown: CancellationToken,
    pub(crate) tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
}

impl AudioPipeline {
    /// Build a pipeline from explicit collaborators
    ///
    /// Validates the configuration, creates the storage directories, removes
    /// intermediates left by a previous run and opens the status ledger
    /// (failing with [`Error::LedgerLocked`](crate::Error::LedgerLocked) if
    /// another process holds it).
    pub async fn new(
        config: Config,
        records: Arc<dyn RecordStore>,
        tools: Arc<dyn MediaTools>,
    ) -> Result<Self> {
        config.validate()?;

        let storage = &config.storage;
        tokio::fs::create_dir_all(&storage.media_dir).await?;
        tokio::fs::create_dir_all(&storage.temp_dir).await?;
        tokio::fs::create_dir_all(&storage.log_dir).await?;

        // Only the ledger owner may touch the temp directory
        let status = StatusStore::open(storage.ledger_path()).await?;
        clear_temp_dir(&storage.temp_dir).await;
        let activity = ActivityLog::new(&storage.log_dir);

        let queue = DownloadQueue::new(
            QueueDeps {
                status: status.clone(),
                limiter: RateLimiter::from_config(&config.rate_limit),
                tools,
                activity: activity.clone(),
                temp_dir: storage.temp_dir.clone(),
            },
            config.queue.clone(),
        );

        let retention = RetentionManager::new(
            status.clone(),
            records.clone(),
            activity.clone(),
            &storage.media_dir,
            config.retention.max_age,
        );

        let disk_guard = DiskGuard::new(
            Arc::new(SystemProbe),
            Arc::new(retention.clone()),
            activity.clone(),
            &storage.media_dir,
            config.disk_guard.threshold,
        );

        tracing::info!(
            media_dir = %storage.media_dir.display(),
            known_tracks = status.snapshot().len(),
            "Audio pipeline initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            status,
            queue,
            retention,
            disk_guard,
            records,
            activity,
            shutdown: CancellationToken::new(),
            tasks: Arc::new(StdMutex::new(Vec::new())),
        })
    }

    /// Build a pipeline over the configured SQLite record store and CLI tools
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let records = SqliteRecordStore::connect(&config.records).await?;
        let tools = CliMediaTools::from_config(&config.tools, &config.transcode)?;
        Self::new(config, Arc::new(records), Arc::new(tools)).await
    }

    /// Effective configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Status store
    pub fn status_store(&self) -> &StatusStore {
        &self.status
    }

    /// Download queue
    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    /// Retention manager
    pub fn retention(&self) -> &RetentionManager {
        &self.retention
    }

    /// Disk guard
    pub fn disk_guard(&self) -> &DiskGuard {
        &self.disk_guard
    }

    /// Activity log
    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    /// Record store
    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::types::StatusEvent> {
        self.status.subscribe()
    }
}

/// Remove files an interrupted run left in the temp directory
async fn clear_temp_dir(temp_dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(temp_dir).await else {
        return;
    };
    let mut removed = 0usize;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && tokio::fs::remove_file(entry.path()).await.is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(removed, path = %temp_dir.display(), "Removed stale intermediate files");
    }
}

impl std::fmt::Debug for AudioPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPipeline")
            .field("media_dir", &self.config.storage.media_dir)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

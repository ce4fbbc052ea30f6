//! Retention sweeps: reconcile artifacts on disk with the record store
//!
//! A sweep looks at every recognized audio file directly inside the media
//! directory whose name starts with a numeric track id:
//!
//! | record | file age | action |
//! |---|---|---|
//! | exists | `<= max_age` | keep, force status to `Ready` |
//! | exists | `> max_age` | delete file, clear status |
//! | missing | any | delete file, clear status |
//!
//! A failure on one file (listing, record lookup, metadata, delete) is
//! counted and logged; the sweep carries on with the next file.

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::fs::{DirEntry, ReadDir};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::activity_log::ActivityLog;
use crate::error::Result;
use crate::media::{is_recognized_audio, parse_track_id};
use crate::records::RecordStore;
use crate::status_store::StatusStore;
use crate::types::{AudioStatus, SweepReport, TrackId};

/// Periodic artifact reconciliation (cloneable - all state is Arc-wrapped)
#[derive(Clone)]
pub struct RetentionManager {
    inner: Arc<Inner>,
}

struct Inner {
    status: StatusStore,
    records: Arc<dyn RecordStore>,
    activity: ActivityLog,
    media_dir: PathBuf,
    max_age: Duration,
    /// Serializes overlapping sweeps (timer vs disk guard vs API)
    sweep_lock: Mutex<()>,
}

enum FileAction {
    Healed,
    Kept,
    Expired,
    Orphaned,
}

impl RetentionManager {
    /// Create a manager for `media_dir`
    pub fn new(
        status: StatusStore,
        records: Arc<dyn RecordStore>,
        activity: ActivityLog,
        media_dir: impl Into<PathBuf>,
        max_age: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                status,
                records,
                activity,
                media_dir: media_dir.into(),
                max_age,
                sweep_lock: Mutex::new(()),
            }),
        }
    }

    /// Directory being swept
    pub fn media_dir(&self) -> &Path {
        &self.inner.media_dir
    }

    /// Run one sweep now
    ///
    /// Waits for a sweep already in progress to finish first. A missing media
    /// directory is an empty sweep; failing to list an existing one is an error.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let _guard = self.inner.sweep_lock.lock().await;
        let started = std::time::Instant::now();

        let mut entries = match tokio::fs::read_dir(&self.inner.media_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    path = %self.inner.media_dir.display(),
                    "Media directory does not exist, nothing to sweep"
                );
                return Ok(SweepReport::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut report = SweepReport::default();
        while let Some(entry) =
            next_listed(&mut entries, &mut report, &self.inner.media_dir).await
        {
            let path = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file || !is_recognized_audio(&path) {
                continue;
            }
            let Some(id) = parse_track_id(&path) else {
                continue;
            };

            report.scanned += 1;
            match self.reconcile(id, &path).await {
                Ok(FileAction::Healed) => report.healed += 1,
                Ok(FileAction::Kept) => {}
                Ok(FileAction::Expired) => report.expired += 1,
                Ok(FileAction::Orphaned) => report.orphaned += 1,
                Err(e) => {
                    report.failed += 1;
                    self.inner
                        .activity
                        .warn(
                            Some(id),
                            format!("Retention sweep failed for {}", path.display()),
                            Some(e.to_string()),
                        )
                        .await;
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            healed = report.healed,
            expired = report.expired,
            orphaned = report.orphaned,
            failed = report.failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Retention sweep finished"
        );
        Ok(report)
    }

    async fn reconcile(&self, id: TrackId, path: &Path) -> Result<FileAction> {
        if !self.inner.records.record_exists(id).await? {
            remove_artifact(path).await?;
            self.inner.status.clear(id).await;
            self.inner
                .activity
                .info(Some(id), "Deleted orphaned audio file")
                .await;
            return Ok(FileAction::Orphaned);
        }

        let modified = tokio::fs::metadata(path).await?.modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);

        if age > self.inner.max_age {
            remove_artifact(path).await?;
            self.inner.status.clear(id).await;
            self.inner
                .activity
                .info(
                    Some(id),
                    format!("Deleted expired audio file ({} days old)", age.as_secs() / 86_400),
                )
                .await;
            return Ok(FileAction::Expired);
        }

        if self.inner.status.get(id) == AudioStatus::Ready {
            return Ok(FileAction::Kept);
        }
        self.inner.status.set(id, AudioStatus::Ready).await;
        tracing::debug!(track_id = id.get(), "Artifact present, status healed to ready");
        Ok(FileAction::Healed)
    }

    /// Sweep every `interval`, starting immediately, until `shutdown` fires
    pub fn spawn_periodic(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = manager.sweep().await {
                            tracing::error!(error = %e, "Retention sweep failed");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Retention task stopped");
                        break;
                    }
                }
            }
        })
    }
}

/// Consecutive listing errors after which a sweep stops reading the directory
const MAX_LISTING_ERRORS: usize = 16;

/// Source of directory entries
#[async_trait]
trait Listing: Send {
    type Entry: Send;

    async fn next(&mut self) -> std::io::Result<Option<Self::Entry>>;
}

#[async_trait]
impl Listing for ReadDir {
    type Entry = DirEntry;

    async fn next(&mut self) -> std::io::Result<Option<DirEntry>> {
        self.next_entry().await
    }
}

/// Next entry of `listing`, counting unreadable entries as failed and skipping them
async fn next_listed<L: Listing>(
    listing: &mut L,
    report: &mut SweepReport,
    dir: &Path,
) -> Option<L::Entry> {
    let mut consecutive = 0;
    loop {
        match listing.next().await {
            Ok(entry) => return entry,
            Err(e) => {
                report.failed += 1;
                consecutive += 1;
                tracing::warn!(path = %dir.display(), error = %e, "Unreadable directory entry, skipping");
                if consecutive >= MAX_LISTING_ERRORS {
                    tracing::error!(path = %dir.display(), "Too many listing errors, ending sweep early");
                    return None;
                }
            }
        }
    }
}

async fn remove_artifact(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl std::fmt::Debug for RetentionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionManager")
            .field("media_dir", &self.inner.media_dir)
            .field("max_age", &self.inner.max_age)
            .finish_non_exhaustive()
    }
}

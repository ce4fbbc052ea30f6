//! Download queue: FIFO scheduling, retry policy and cancellation
//!
//! The queue is split into focused submodules:
//! - this module - job admission, cancellation and inspection
//! - [`processor`] - the single-flight processing loop and retry policy
//! - [`job`] - fetch + transcode execution of one job
//!
//! One job runs at a time. The job at the head of the queue stays there while
//! it executes; it is removed on success or once retries are exhausted, and a
//! failed attempt moves it to the tail.

mod job;
mod processor;


use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::activity_log::ActivityLog;
use crate::config::QueueConfig;
use crate::media::MediaTools;
use crate::rate_limiter::RateLimiter;
use crate::status_store::StatusStore;
use crate::types::{AudioStatus, QueueSnapshot, QueuedJob, TrackId};

/// Job that is currently executing
#[derive(Debug)]
pub(crate) struct ActiveJob {
    pub(crate) id: TrackId,
    pub(crate) cancel: CancellationToken,
}

/// Collaborators of the queue
pub struct QueueDeps {
    /// Status store receiving every transition
    pub status: StatusStore,
    /// Token bucket gating job starts
    pub limiter: RateLimiter,
    /// Fetch/transcode implementation
    pub tools: Arc<dyn MediaTools>,
    /// Activity log for lifecycle events
    pub activity: ActivityLog,
    /// Directory for fetch and transcode intermediates
    pub temp_dir: PathBuf,
}

/// FIFO download queue (cloneable - all state is Arc-wrapped)
#[derive(Clone)]
pub struct DownloadQueue {
    pub(crate) inner: Arc<QueueInner>,
}

pub(crate) struct QueueInner {
    /// Queued jobs in order; the head may be executing
    pub(crate) jobs: Mutex<VecDeque<QueuedJob>>,
    /// Set while a processing loop is running
    pub(crate) busy: AtomicBool,
    /// Cleared during shutdown
    pub(crate) accepting: AtomicBool,
    pub(crate) active: StdMutex<Option<ActiveJob>>,
    pub(crate) worker: StdMutex<Option<JoinHandle<()>>>,
    /// Parent of every job's cancellation token
    pub(crate) shutdown: CancellationToken,
    pub(crate) status: StatusStore,
    pub(crate) limiter: RateLimiter,
    pub(crate) tools: Arc<dyn MediaTools>,
    pub(crate) activity: ActivityLog,
    pub(crate) temp_dir: PathBuf,
    pub(crate) config: QueueConfig,
}

impl DownloadQueue {
    /// Create an idle queue
    pub fn new(deps: QueueDeps, config: QueueConfig) -> Self {
        tracing::info!(
            tools = deps.tools.name(),
            max_retries = config.max_retries,
            retry_delay_ms = config.retry_delay.as_millis() as u64,
            "Download queue initialized"
        );

        Self {
            inner: Arc::new(QueueInner {
                jobs: Mutex::new(VecDeque::new()),
                busy: AtomicBool::new(false),
                accepting: AtomicBool::new(true),
                active: StdMutex::new(None),
                worker: StdMutex::new(None),
                shutdown: CancellationToken::new(),
                status: deps.status,
                limiter: deps.limiter,
                tools: deps.tools,
                activity: deps.activity,
                temp_dir: deps.temp_dir,
                config,
            }),
        }
    }

    /// Queue a download of `source_ref` into `destination`
    ///
    /// - no-op when the track's status is already `Ready`
    /// - if the track is already queued, its source reference and destination
    ///   are replaced in place (queue length unchanged)
    /// - otherwise the job is appended, the status set to `Pending`, and
    ///   processing started if the queue was idle
    ///
    /// Never fails; during shutdown the request is logged and dropped.
    pub async fn enqueue(
        &self,
        id: TrackId,
        source_ref: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) {
        let source_ref = source_ref.into();
        let destination = destination.into();

        if !self.inner.accepting.load(Ordering::SeqCst) {
            tracing::warn!(track_id = id.get(), "Queue shutting down, enqueue ignored");
            return;
        }

        if self.inner.status.get(id) == AudioStatus::Ready {
            tracing::debug!(track_id = id.get(), "Audio already ready, enqueue ignored");
            return;
        }

        {
            let mut jobs = self.inner.jobs.lock().await;
            if let Some(job) = jobs.iter_mut().find(|job| job.id == id) {
                job.source_ref = source_ref;
                job.destination = destination;
                tracing::debug!(track_id = id.get(), "Updated source of queued job");
                return;
            }

            jobs.push_back(QueuedJob {
                id,
                source_ref,
                destination,
                retry_count: 0,
            });

            // Set while holding the queue so the processor cannot start the job
            // (and report Downloading) before Pending is recorded
            self.inner.status.set(id, AudioStatus::Pending).await;
        }

        self.inner
            .activity
            .info(Some(id), "Queued for download")
            .await;

        self.start_processing();
    }

    /// Cancel a queued or running download
    ///
    /// Removes the job from the queue and, if it is executing, cancels it; the
    /// child processes are terminated and intermediates removed. The status
    /// becomes `Error{CANCELLED}` in every case, even when no job existed.
    pub async fn cancel_download(&self, id: TrackId) {
        let mut jobs = self.inner.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|job| job.id != id);
        let was_queued = jobs.len() != before;

        let was_active = {
            let active = self
                .inner
                .active
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match active.as_ref() {
                Some(job) if job.id == id => {
                    job.cancel.cancel();
                    true
                }
                _ => false,
            }
        };

        self.inner.status.set(id, AudioStatus::cancelled()).await;
        drop(jobs);

        tracing::debug!(track_id = id.get(), was_queued, was_active, "Cancel requested");
        self.inner
            .activity
            .info(Some(id), "Download cancelled")
            .await;
    }

    /// Number of queued jobs (including the executing one)
    pub async fn len(&self) -> usize {
        self.inner.jobs.lock().await.len()
    }

    /// Whether no jobs are queued
    pub async fn is_empty(&self) -> bool {
        self.inner.jobs.lock().await.is_empty()
    }

    /// Whether `id` is queued or executing
    pub async fn contains(&self, id: TrackId) -> bool {
        self.inner.jobs.lock().await.iter().any(|job| job.id == id)
    }

    /// Id of the executing job
    pub fn active_id(&self) -> Option<TrackId> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|job| job.id)
    }

    /// Whether a processing loop is running
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::SeqCst)
    }

    /// Queued jobs in order plus the executing id
    pub async fn snapshot(&self) -> QueueSnapshot {
        let jobs = self.inner.jobs.lock().await.iter().cloned().collect();
        QueueSnapshot {
            jobs,
            active: self.active_id(),
        }
    }

    /// Stop accepting jobs, cancel the executing one and wait for the loop to exit
    ///
    /// Jobs still queued keep their in-flight status, which the status store
    /// reports as interrupted after the next start.
    pub async fn shutdown(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.inner.shutdown.cancel();

        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = worker
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Queue processor panicked");
        }

        tracing::info!("Download queue stopped");
    }
}

impl std::fmt::Debug for DownloadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadQueue")
            .field("busy", &self.is_busy())
            .field("active", &self.active_id())
            .finish_non_exhaustive()
    }
}

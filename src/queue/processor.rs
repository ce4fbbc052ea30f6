//! Queue processor: runs the head job, applies the retry policy, repeats.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::job::{self, JobOutcome};
use super::{ActiveJob, DownloadQueue, QueueInner};
use crate::types::{AudioStatus, ErrorCode, QueuedJob, StatusError};

/// Message recorded when a job exhausts its retries
pub(crate) const MAX_RETRIES_MESSAGE: &str = "Maximum retry attempts reached";

impl DownloadQueue {
    /// Spawn the processing loop unless one is already running
    pub(crate) fn start_processing(&self) {
        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        // Spawn while holding the slot so a loop started right after this one
        // exits cannot have its handle overwritten by ours
        let mut worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let inner = Arc::clone(&self.inner);
        *worker = Some(tokio::spawn(async move { process_queue(inner).await }));
    }
}

/// Process jobs until the queue is empty or shutdown is requested
///
/// 1. Inspect the head job
/// 2. Acquire a rate limiter token (held until the attempt ends)
/// 3. Execute fetch + transcode
/// 4. Success: dequeue, `Ready`. Failure: retry at the tail after a fixed
///    delay, or dequeue with `MAX_RETRIES_EXCEEDED` once retries run out
async fn process_queue(inner: Arc<QueueInner>) {
    loop {
        if inner.shutdown.is_cancelled() {
            break;
        }

        // The busy flag is cleared under the queue lock so an enqueue that
        // races with an empty queue always starts a fresh loop. The head
        // becomes active under the same lock, so cancel_download either
        // removes it before it is picked or finds its token.
        let cancel = inner.shutdown.child_token();
        let next = {
            let jobs = inner.jobs.lock().await;
            match jobs.front() {
                Some(job) => {
                    set_active(
                        &inner,
                        Some(ActiveJob {
                            id: job.id,
                            cancel: cancel.clone(),
                        }),
                    );
                    job.clone()
                }
                None => {
                    inner.busy.store(false, Ordering::SeqCst);
                    return;
                }
            }
        };

        let _token = tokio::select! {
            guard = inner.limiter.acquire_guard() => guard,
            _ = cancel.cancelled() => {
                set_active(&inner, None);
                continue;
            }
        };

        let outcome = job::execute(&inner, &next, cancel.clone()).await;
        set_active(&inner, None);

        match outcome {
            JobOutcome::Cancelled => {
                // cancel_download already dequeued the job and recorded the status
                continue;
            }
            JobOutcome::Completed => complete(&inner, &next).await,
            JobOutcome::Failed(message) => {
                if let Some(delay) = fail(&inner, &next, message).await {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = inner.shutdown.cancelled() => break,
                    }
                }
            }
        }
    }

    inner.busy.store(false, Ordering::SeqCst);
}

fn set_active(inner: &QueueInner, job: Option<ActiveJob>) {
    *inner
        .active
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = job;
}

async fn complete(inner: &QueueInner, job: &QueuedJob) {
    let mut jobs = inner.jobs.lock().await;
    let Some(pos) = jobs.iter().position(|queued| queued.id == job.id) else {
        // Cancelled after the artifact landed; the cancel wins
        drop(jobs);
        remove_artifact(job).await;
        return;
    };
    jobs.remove(pos);
    inner.status.set(job.id, AudioStatus::Ready).await;
    drop(jobs);

    inner
        .activity
        .info(Some(job.id), "Download completed")
        .await;
}

/// Apply the retry policy; returns the backoff delay when the job was requeued
async fn fail(
    inner: &QueueInner,
    job: &QueuedJob,
    message: String,
) -> Option<std::time::Duration> {
    let max_retries = inner.config.max_retries;

    let mut jobs = inner.jobs.lock().await;
    let pos = jobs.iter().position(|queued| queued.id == job.id)?;

    let retry_count = jobs[pos].retry_count;
    if retry_count < max_retries {
        let Some(mut retried) = jobs.remove(pos) else {
            return None;
        };
        retried.retry_count += 1;
        let retry_count = retried.retry_count;
        jobs.push_back(retried);

        inner
            .status
            .set(
                job.id,
                AudioStatus::error(
                    StatusError::new(message.clone()).with_retries(retry_count, max_retries),
                ),
            )
            .await;
        drop(jobs);

        inner
            .activity
            .warn(
                Some(job.id),
                format!("Download failed, retry {retry_count}/{max_retries}"),
                Some(message),
            )
            .await;
        Some(inner.config.retry_delay)
    } else {
        jobs.remove(pos);
        inner
            .status
            .set(
                job.id,
                AudioStatus::error(
                    StatusError::new(MAX_RETRIES_MESSAGE)
                        .with_code(ErrorCode::MaxRetriesExceeded)
                        .with_retries(retry_count, max_retries),
                ),
            )
            .await;
        drop(jobs);

        inner
            .activity
            .error(Some(job.id), MAX_RETRIES_MESSAGE, Some(message))
            .await;
        None
    }
}

async fn remove_artifact(job: &QueuedJob) {
    match tokio::fs::remove_file(&job.destination).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            track_id = job.id.get(),
            path = %job.destination.display(),
            error = %e,
            "Failed to remove artifact of cancelled job"
        ),
    }
}

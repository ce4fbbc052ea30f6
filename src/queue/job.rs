//! Execution of a single job: fetch, transcode, move into place.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::QueueInner;
use crate::error::{Error, Result};
use crate::media::FetchRequest;
use crate::types::{AudioStatus, QueuedJob, TrackId};

/// How an attempt ended
#[derive(Debug)]
pub(crate) enum JobOutcome {
    /// The artifact is at the job's destination
    Completed,
    /// The job's token fired (explicit cancel or shutdown)
    Cancelled,
    /// The attempt failed; the message feeds the status and retry policy
    Failed(String),
}

/// Run one attempt of `job`
///
/// Intermediates live in the queue's temp directory and are removed on every
/// exit path; the destination only ever receives a complete artifact.
pub(crate) async fn execute(
    inner: &QueueInner,
    job: &QueuedJob,
    cancel: CancellationToken,
) -> JobOutcome {
    inner
        .activity
        .info(Some(job.id), "Download started")
        .await;
    set_unless_cancelled(inner, job.id, &cancel, AudioStatus::Downloading { progress: None }).await;

    let result = fetch_and_transcode(inner, job, &cancel).await;
    cleanup_intermediates(&inner.temp_dir, job.id).await;

    match result {
        _ if cancel.is_cancelled() => {
            tracing::debug!(track_id = job.id.get(), "Attempt ended by cancellation");
            JobOutcome::Cancelled
        }
        Ok(()) => JobOutcome::Completed,
        Err(Error::Cancelled) => JobOutcome::Cancelled,
        Err(e) => JobOutcome::Failed(e.to_string()),
    }
}

async fn fetch_and_transcode(
    inner: &QueueInner,
    job: &QueuedJob,
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::fs::create_dir_all(&inner.temp_dir).await?;

    let request = FetchRequest {
        id: job.id,
        source_ref: job.source_ref.clone(),
        output_dir: inner.temp_dir.clone(),
    };

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let fetch = inner.tools.fetch(&request, progress_tx, cancel.clone());
    tokio::pin!(fetch);

    let mut last_progress: Option<f32> = None;
    let fetched = loop {
        tokio::select! {
            result = &mut fetch => break result?,
            Some(progress) = progress_rx.recv() => {
                if last_progress != Some(progress) {
                    last_progress = Some(progress);
                    tracing::debug!(track_id = job.id.get(), progress, "Fetch progress");
                    set_unless_cancelled(
                        inner,
                        job.id,
                        cancel,
                        AudioStatus::Downloading { progress: Some(progress) },
                    )
                    .await;
                }
            }
        }
    };

    let staging = staging_path(&inner.temp_dir, job);
    let transcoded = inner.tools.transcode(&fetched, &staging, cancel.clone()).await;
    remove_if_exists(&fetched).await;
    transcoded?;

    if !tokio::fs::try_exists(&staging).await.unwrap_or(false) {
        return Err(Error::MissingOutput {
            stage: "transcode",
            path: staging,
        });
    }
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    move_into_place(&staging, &job.destination).await?;

    if !tokio::fs::try_exists(&job.destination).await.unwrap_or(false) {
        return Err(Error::MissingOutput {
            stage: "transcode",
            path: job.destination.clone(),
        });
    }
    Ok(())
}

/// Record a status for the running job unless it was cancelled
///
/// Takes the queue lock, which `cancel_download` holds while it cancels the
/// token and records the cancelled status, so a late progress report can never
/// overwrite the cancellation.
async fn set_unless_cancelled(
    inner: &QueueInner,
    id: TrackId,
    cancel: &CancellationToken,
    status: AudioStatus,
) {
    let _jobs = inner.jobs.lock().await;
    if !cancel.is_cancelled() {
        inner.status.set(id, status).await;
    }
}

/// `<temp_dir>/<id>.transcode.<ext>`, ext taken from the destination
fn staging_path(temp_dir: &Path, job: &QueuedJob) -> PathBuf {
    let ext = job
        .destination
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("opus");
    temp_dir.join(format!("{}.transcode.{ext}", job.id))
}

/// Rename `from` to `to`, falling back to copy + delete across filesystems
async fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    // Copy next to the destination first so the final step is still a rename
    let mut partial = to.as_os_str().to_owned();
    partial.push(".incoming");
    let partial = PathBuf::from(partial);
    tokio::fs::copy(from, &partial).await?;
    tokio::fs::rename(&partial, to).await?;
    remove_if_exists(from).await;
    Ok(())
}

/// Remove every `<id>.*` file left in the temp directory
pub(crate) async fn cleanup_intermediates(temp_dir: &Path, id: TrackId) {
    let prefix = format!("{id}.");
    let mut entries = match tokio::fs::read_dir(temp_dir).await {
        Ok(entries) => entries,
        Err(_) => return,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(&prefix) {
            remove_if_exists(&entry.path()).await;
        }
    }
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove intermediate file"),
    }
}

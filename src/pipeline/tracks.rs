//! Per-track operations: status with recovery, retry, record hooks.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::media::{RECOGNIZED_EXTENSIONS, parse_track_id};
use crate::types::{AudioStatus, ErrorCode, StatusResponse, TrackId};

use super::AudioPipeline;

impl AudioPipeline {
    /// Where the artifact for `id` is written
    pub fn destination(&self, id: TrackId) -> PathBuf {
        self.config.storage.artifact_path(id)
    }

    /// Path of the artifact for `id`, if one is on disk
    ///
    /// Prefers the configured extension and falls back to any recognized
    /// audio file named `<id>.<ext>` in the media directory.
    pub async fn artifact_path(&self, id: TrackId) -> Option<PathBuf> {
        let preferred = self.destination(id);
        if tokio::fs::try_exists(&preferred).await.unwrap_or(false) {
            return Some(preferred);
        }
        self.artifact_files(id).await.into_iter().next()
    }

    /// Whether an artifact for `id` is on disk
    pub async fn artifact_exists(&self, id: TrackId) -> bool {
        self.artifact_path(id).await.is_some()
    }

    /// Every recognized artifact file for `id` directly in the media directory
    async fn artifact_files(&self, id: TrackId) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.config.storage.media_dir).await else {
            return found;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let matches_ext = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.split_once('.'))
                .is_some_and(|(_, ext)| {
                    RECOGNIZED_EXTENSIONS
                        .iter()
                        .any(|known| ext.eq_ignore_ascii_case(known))
                });
            if matches_ext && parse_track_id(&path) == Some(id) {
                found.push(path);
            }
        }
        found
    }

    /// Current status of `id`, repairing drift between status and disk
    ///
    /// - artifact on disk, status neither `Ready` nor backed by a queued job:
    ///   healed to `Ready`
    /// - no artifact and status `Ready`, or a stale in-flight status, or an
    ///   interruption by restart: re-enqueued from the record's source
    ///
    /// Cancelled jobs and jobs that exhausted their retries stay as they are
    /// until [`retry`](Self::retry) is called. Record lookup failures are
    /// logged and the stored status returned.
    pub async fn status(&self, id: TrackId) -> StatusResponse {
        let current = self.status.get(id);
        let queued = self.queue.contains(id).await;

        if self.artifact_exists(id).await {
            if current != AudioStatus::Ready && !(current.is_in_flight() && queued) {
                tracing::info!(track_id = id.get(), ?current, "Artifact present, healing status");
                self.status.set(id, AudioStatus::Ready).await;
                return AudioStatus::Ready.into();
            }
            return current.into();
        }

        let needs_download = match &current {
            AudioStatus::Ready => true,
            AudioStatus::Pending | AudioStatus::Downloading { .. } => !queued,
            AudioStatus::Error { error } => {
                !queued
                    && !matches!(
                        error.code,
                        Some(ErrorCode::Cancelled | ErrorCode::MaxRetriesExceeded)
                    )
            }
        };
        if !needs_download {
            return current.into();
        }

        match self.enqueue_from_record(id).await {
            Ok(status) => status.into(),
            Err(Error::NotFound(_) | Error::NoSourceRef(_) | Error::ShuttingDown) => current.into(),
            Err(e) => {
                tracing::warn!(track_id = id.get(), error = %e, "Status recovery failed");
                current.into()
            }
        }
    }

    /// Reset `id` to pending and download it again from its record's source
    ///
    /// Fails with [`Error::NotFound`] or [`Error::NoSourceRef`] when there is
    /// nothing to download, and with [`Error::ShuttingDown`] during shutdown.
    pub async fn retry(&self, id: TrackId) -> Result<AudioStatus> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        let source_ref = self.source_ref(id).await?;
        self.status.set(id, AudioStatus::Pending).await;
        self.queue
            .enqueue(id, source_ref, self.destination(id))
            .await;
        Ok(self.status.get(id))
    }

    /// Queue a download of `id` from its record unless the artifact is ready
    pub async fn enqueue_from_record(&self, id: TrackId) -> Result<AudioStatus> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        let source_ref = self.source_ref(id).await?;
        if self.status.get(id) == AudioStatus::Ready {
            // Ready without an artifact on disk; enqueue would ignore it
            self.status.set(id, AudioStatus::Pending).await;
        }
        self.queue
            .enqueue(id, source_ref, self.destination(id))
            .await;
        Ok(self.status.get(id))
    }

    /// Cancel any download of `id`
    pub async fn cancel(&self, id: TrackId) {
        self.queue.cancel_download(id).await;
    }

    /// Record-deletion hook: stop any download, delete the artifact and forget the status
    pub async fn remove_track(&self, id: TrackId) -> Result<()> {
        self.discard(id).await?;
        self.activity
            .info(Some(id), "Audio removed with its record")
            .await;
        Ok(())
    }

    /// Source-change hook: discard the old artifact and fetch from the new source
    ///
    /// Returns the resulting status; records without a source end up with no
    /// status at all.
    pub async fn source_changed(&self, id: TrackId) -> Result<AudioStatus> {
        self.discard(id).await?;
        self.activity
            .info(Some(id), "Source changed, audio will be fetched again")
            .await;

        match self.enqueue_from_record(id).await {
            Ok(status) => Ok(status),
            Err(Error::NoSourceRef(_)) => Ok(self.status.get(id)),
            Err(e) => Err(e),
        }
    }

    async fn discard(&self, id: TrackId) -> Result<()> {
        if self.queue.contains(id).await || self.queue.active_id() == Some(id) {
            self.queue.cancel_download(id).await;
        }
        for path in self.artifact_files(id).await {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::debug!(track_id = id.get(), path = %path.display(), "Artifact deleted");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.status.clear(id).await;
        Ok(())
    }

    async fn source_ref(&self, id: TrackId) -> Result<String> {
        let record = self
            .records
            .get_record(id)
            .await?
            .ok_or(Error::NotFound(id.get()))?;
        record
            .source_ref
            .filter(|s| !s.trim().is_empty())
            .ok_or(Error::NoSourceRef(id.get()))
    }
}

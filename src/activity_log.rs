//! Pipeline activity log
//!
//! Every lifecycle event of the audio pipeline (queued, started, retried,
//! failed, cancelled, completed, swept, low disk) is emitted as a `tracing`
//! event and also appended as one JSON line to `<log_dir>/audio.log`:
//!
//! ```json
//! {"timestamp":"2026-10-17T09:12:44.120Z","level":"warn","trackId":12,"message":"Download failed, retrying","error":"yt-dlp exited with exit status: 1"}
//! ```
//!
//! Error entries are written to `<log_dir>/audio-errors.log` as well. A file
//! larger than [`MAX_LOG_SIZE`] is renamed to `<file>.<unix_millis>.old`
//! before the next write. Write failures are reported through `tracing` and
//! otherwise ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use utoipa::ToSchema;

use crate::error::Result;
use crate::types::TrackId;

/// Size above which a log file is rotated (10 MiB)
pub const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Main log file name
pub const LOG_FILE_NAME: &str = "audio.log";

/// Error-only log file name
pub const ERROR_LOG_FILE_NAME: &str = "audio-errors.log";

/// Severity of an activity entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Normal lifecycle transition
    Info,
    /// Recoverable problem (retry, per-file sweep failure, low disk)
    Warn,
    /// Terminal failure
    Error,
}

/// One line of the activity log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// When the event happened (RFC 3339, UTC)
    #[schema(value_type = String)]
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub level: LogLevel,
    /// Track the event concerns, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<TrackId>,
    /// What happened
    pub message: String,
    /// Underlying error text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only activity log (cloneable - shares one writer lock)
#[derive(Clone, Debug)]
pub struct ActivityLog {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    log_path: PathBuf,
    error_path: PathBuf,
    max_size: u64,
    write_lock: Mutex<()>,
}

impl ActivityLog {
    /// Log into `log_dir` (created on first write)
    pub fn new(log_dir: impl AsRef<Path>) -> Self {
        Self::with_max_size(log_dir, MAX_LOG_SIZE)
    }

    /// Log into `log_dir`, rotating files larger than `max_size` bytes
    pub fn with_max_size(log_dir: impl AsRef<Path>, max_size: u64) -> Self {
        let log_dir = log_dir.as_ref();
        Self {
            inner: Arc::new(Inner {
                log_path: log_dir.join(LOG_FILE_NAME),
                error_path: log_dir.join(ERROR_LOG_FILE_NAME),
                max_size,
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Path of the main log file
    pub fn log_path(&self) -> &Path {
        &self.inner.log_path
    }

    /// Record an informational event
    pub async fn info(&self, track_id: Option<TrackId>, message: impl Into<String>) {
        self.record(LogLevel::Info, track_id, message.into(), None)
            .await;
    }

    /// Record a warning, optionally with the error that caused it
    pub async fn warn(
        &self,
        track_id: Option<TrackId>,
        message: impl Into<String>,
        error: Option<String>,
    ) {
        self.record(LogLevel::Warn, track_id, message.into(), error)
            .await;
    }

    /// Record a terminal failure
    pub async fn error(
        &self,
        track_id: Option<TrackId>,
        message: impl Into<String>,
        error: Option<String>,
    ) {
        self.record(LogLevel::Error, track_id, message.into(), error)
            .await;
    }

    async fn record(
        &self,
        level: LogLevel,
        track_id: Option<TrackId>,
        message: String,
        error: Option<String>,
    ) {
        let id = track_id.map(|id| id.get());
        match level {
            LogLevel::Info => tracing::info!(track_id = id, "{message}"),
            LogLevel::Warn => tracing::warn!(track_id = id, error = error.as_deref(), "{message}"),
            LogLevel::Error => tracing::error!(track_id = id, error = error.as_deref(), "{message}"),
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            track_id,
            message,
            error,
        };
        if let Err(e) = self.append(&entry).await {
            tracing::warn!(
                path = %self.inner.log_path.display(),
                error = %e,
                "Failed to write activity log"
            );
        }
    }

    async fn append(&self, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.inner.write_lock.lock().await;

        if let Some(parent) = self.inner.log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if entry.level == LogLevel::Error {
            append_line(&self.inner.error_path, &line, self.inner.max_size).await?;
        }
        append_line(&self.inner.log_path, &line, self.inner.max_size).await
    }

    /// The last `limit` entries of the main log, oldest first
    ///
    /// Lines that are not valid entries are skipped. A missing log is empty.
    pub async fn recent(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let content = match tokio::fs::read_to_string(&self.inner.log_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let entries: Vec<LogEntry> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        let skip = entries.len().saturating_sub(limit);
        Ok(entries.into_iter().skip(skip).collect())
    }
}

/// Rotate `path` if it is over `max_size`, then append `line`
async fn append_line(path: &Path, line: &[u8], max_size: u64) -> Result<()> {
    if let Ok(metadata) = tokio::fs::metadata(path).await
        && metadata.len() > max_size
    {
        let mut rotated = path.as_os_str().to_owned();
        rotated.push(format!(".{}.old", Utc::now().timestamp_millis()));
        tokio::fs::rename(path, PathBuf::from(rotated)).await?;
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line).await?;
    file.flush().await?;
    Ok(())
}

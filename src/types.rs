//! Core types for track-fetch

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Identifier of a catalog record (and of the artifact that belongs to it)
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct TrackId(pub i64);

impl TrackId {
    /// Create a new TrackId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TrackId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TrackId> for i64 {
    fn from(id: TrackId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TrackId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode so ids bind directly in record queries
impl sqlx::Type<sqlx::Sqlite> for TrackId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TrackId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TrackId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Machine-readable reason attached to an error status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The job was in flight when the process stopped
    ServerRestart,
    /// The job was cancelled explicitly
    Cancelled,
    /// Every retry attempt failed
    MaxRetriesExceeded,
}

/// Error payload of [`AudioStatus::Error`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusError {
    /// Human-readable failure message
    pub message: String,
    /// Failure classification, when one applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    /// Attempts already retried when this status was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Retry ceiling in effect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl StatusError {
    /// Error with only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retry_count: None,
            max_retries: None,
        }
    }

    /// Attach a code
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach retry bookkeeping
    pub fn with_retries(mut self, retry_count: u32, max_retries: u32) -> Self {
        self.retry_count = Some(retry_count);
        self.max_retries = Some(max_retries);
        self
    }
}

/// Lifecycle state of one track's audio
///
/// The serialized form is the ledger format:
///
/// ```json
/// { "status": "downloading", "progress": 40.0 }
/// { "status": "error", "error": { "message": "Download cancelled", "code": "CANCELLED" } }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AudioStatus {
    /// Nothing known yet, or queued and not started
    Pending,
    /// A fetch is running; progress is a percentage when the tool reported one
    Downloading {
        /// Fetch progress (0.0 to 100.0)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f32>,
    },
    /// The artifact is complete and servable
    Ready,
    /// The last attempt failed (possibly with retries still pending)
    Error {
        /// Failure details
        error: StatusError,
    },
}

impl AudioStatus {
    /// Error status with only a message
    pub fn error(error: StatusError) -> Self {
        AudioStatus::Error { error }
    }

    /// The status assigned on load to work that was in flight when the process stopped
    pub fn server_restart() -> Self {
        AudioStatus::Error {
            error: StatusError::new("Download interrupted by server restart")
                .with_code(ErrorCode::ServerRestart),
        }
    }

    /// The status assigned to an explicitly cancelled job
    pub fn cancelled() -> Self {
        AudioStatus::Error {
            error: StatusError::new("Download cancelled").with_code(ErrorCode::Cancelled),
        }
    }

    /// Whether the status describes work that has not reached a terminal state
    pub fn is_in_flight(&self) -> bool {
        match self {
            AudioStatus::Pending | AudioStatus::Downloading { .. } => true,
            AudioStatus::Ready | AudioStatus::Error { .. } => false,
        }
    }

    /// The discriminant, for flat API responses
    pub fn kind(&self) -> StatusKind {
        match self {
            AudioStatus::Pending => StatusKind::Pending,
            AudioStatus::Downloading { .. } => StatusKind::Downloading,
            AudioStatus::Ready => StatusKind::Ready,
            AudioStatus::Error { .. } => StatusKind::Error,
        }
    }
}

/// Discriminant of [`AudioStatus`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    /// See [`AudioStatus::Pending`]
    Pending,
    /// See [`AudioStatus::Downloading`]
    Downloading,
    /// See [`AudioStatus::Ready`]
    Ready,
    /// See [`AudioStatus::Error`]
    Error,
}

/// Flat status shape returned to HTTP clients: `{status, progress?, error?}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    /// Lifecycle state
    pub status: StatusKind,
    /// Fetch progress while downloading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    /// Failure details for error statuses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StatusError>,
}

impl From<AudioStatus> for StatusResponse {
    fn from(status: AudioStatus) -> Self {
        let kind = status.kind();
        match status {
            AudioStatus::Pending | AudioStatus::Ready => Self {
                status: kind,
                progress: None,
                error: None,
            },
            AudioStatus::Downloading { progress } => Self {
                status: kind,
                progress,
                error: None,
            },
            AudioStatus::Error { error } => Self {
                status: kind,
                progress: None,
                error: Some(error),
            },
        }
    }
}

/// Status change broadcast by the status store
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    /// A status was set
    Updated {
        /// Track ID
        id: TrackId,
        /// The new status
        status: AudioStatus,
    },
    /// A status was removed
    Cleared {
        /// Track ID
        id: TrackId,
    },
}

/// A job waiting in (or at the head of) the download queue
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QueuedJob {
    /// Track ID
    pub id: TrackId,
    /// Source reference handed to the fetch tool
    pub source_ref: String,
    /// Destination path of the artifact
    #[schema(value_type = String)]
    pub destination: std::path::PathBuf,
    /// Failed attempts so far
    pub retry_count: u32,
}

/// Snapshot of the download queue
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueSnapshot {
    /// Jobs in queue order (the head may be the active job)
    pub jobs: Vec<QueuedJob>,
    /// ID of the job currently executing, if any
    pub active: Option<TrackId>,
}

/// Filesystem capacity figures for the media directory, in bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DiskSpace {
    /// Bytes available to unprivileged users
    pub available: u64,
    /// Total filesystem size
    pub total: u64,
    /// Bytes in use
    pub used: u64,
}

impl DiskSpace {
    /// Available space as a fraction of total, `None` when total is zero
    pub fn available_fraction(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.available as f64 / self.total as f64)
        }
    }
}

/// Outcome counters of one retention sweep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SweepReport {
    /// Artifact files examined
    pub scanned: usize,
    /// Artifacts whose record exists and whose status was forced to ready
    pub healed: usize,
    /// Artifacts deleted for exceeding the maximum age
    pub expired: usize,
    /// Artifacts deleted because their record no longer exists
    pub orphaned: usize,
    /// Files whose processing failed (left in place)
    pub failed: usize,
}

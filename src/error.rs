//! Error types for track-fetch
//!
//! This module provides error handling for the library, including:
//! - The crate-wide [`Error`] enum with contextual variants
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes
//!
//! Pipeline operations (`enqueue`, `cancel_download`, sweeps) never surface these
//! errors to callers; their outcome is only observable through the status store.
//! The enum is used at construction time, by the record store, by the media tools
//! seam (where every error feeds the retry policy) and by the REST API.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for track-fetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for track-fetch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "disk_guard.threshold")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record store query failed
    #[error("record store error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Ledger (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool (yt-dlp, ffmpeg) failed or exited non-zero
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// External tool binary could not be located
    #[error("{tool} not found (checked config, {bin_dir} and PATH)")]
    ToolNotFound {
        /// Tool name, e.g. "yt-dlp"
        tool: String,
        /// The local binary directory that was searched
        bin_dir: PathBuf,
    },

    /// A pipeline stage exited successfully but its output file is missing
    #[error("{stage} produced no output at {path}")]
    MissingOutput {
        /// Stage name ("fetch" or "transcode")
        stage: &'static str,
        /// Where the output was expected
        path: PathBuf,
    },

    /// Another process already owns the status ledger
    #[error("status ledger {path} is locked by another process")]
    LedgerLocked {
        /// Path of the ledger lock file
        path: PathBuf,
    },

    /// Catalog record not found
    #[error("record {0} not found")]
    NotFound(i64),

    /// Catalog record has no source reference to fetch from
    #[error("record {0} has no source reference")]
    NoSourceRef(i64),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// The operation was cancelled before it completed
    #[error("operation cancelled")]
    Cancelled,

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a [`Error::Config`] for the given key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "no_source_ref",
///     "message": "record 12 has no source reference",
///     "details": { "track_id": 12 }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "shutting_down")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,

            Error::NotFound(_) => 404,
            Error::NoSourceRef(_) => 404,

            Error::LedgerLocked { .. } => 409,

            Error::Io(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Serialization(_) => 500,
            Error::DiskSpaceCheckFailed(_) => 500,
            Error::MissingOutput { .. } => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            Error::ExternalTool(_) => 502,

            Error::ShuttingDown => 503,
            Error::ToolNotFound { .. } => 503,
            Error::Cancelled => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::Sqlx(_) => "record_store_error",
            Error::Serialization(_) => "serialization_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::ToolNotFound { .. } => "tool_not_found",
            Error::MissingOutput { .. } => "missing_output",
            Error::LedgerLocked { .. } => "ledger_locked",
            Error::NotFound(_) => "not_found",
            Error::NoSourceRef(_) => "no_source_ref",
            Error::ShuttingDown => "shutting_down",
            Error::DiskSpaceCheckFailed(_) => "disk_space_check_failed",
            Error::Cancelled => "cancelled",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::NotFound(id) | Error::NoSourceRef(id) => Some(serde_json::json!({
                "track_id": id,
            })),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            Error::ToolNotFound { tool, bin_dir } => Some(serde_json::json!({
                "tool": tool,
                "bin_dir": bin_dir,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}

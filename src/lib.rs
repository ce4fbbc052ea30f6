//! # track-fetch
//!
//! Asynchronous audio acquisition for catalog records.
//!
//! A web application keeps a catalog of records, each with an optional source
//! reference (a URL the fetch tool understands). track-fetch turns those
//! references into local audio files and keeps the two in step:
//!
//! - **Download queue** - one job at a time, throttled by a token bucket,
//!   retried at the tail of the queue on failure, cancellable
//! - **Status store** - per-record status persisted to a JSON ledger that
//!   survives restarts (in-flight work is reported as interrupted)
//! - **Retention** - periodic sweeps delete orphaned and expired artifacts
//!   and heal statuses that disagree with the disk
//! - **Disk guard** - sweeps early when free space runs low
//! - **Activity log** - append-only JSON lines for operators
//! - **REST API** - status, retry, cancel, record hooks, maintenance
//!
//! ## Quick Start
//!
//! ```no_run
//! use track_fetch::{AudioPipeline, Config, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = AudioPipeline::connect(Config::default()).await?;
//!     pipeline.start_background_tasks();
//!
//!     // Watch status changes
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     pipeline.spawn_api_server();
//!     run_with_shutdown(pipeline).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Append-only activity log
pub mod activity_log;
/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Free-space monitoring
pub mod disk_guard;
/// Error types
pub mod error;
/// Fetch and transcode tooling
pub mod media;
/// The pipeline service object
pub mod pipeline;
/// Download queue and job execution
pub mod queue;
/// Token bucket rate limiting
pub mod rate_limiter;
/// Catalog record access
pub mod records;
/// Retention sweeps
pub mod retention;
/// Persistent per-track status
pub mod status_store;
/// Core types and events
pub mod types;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use activity_log::{ActivityLog, LogEntry, LogLevel};
pub use config::Config;
pub use disk_guard::DiskGuard;
pub use error::{ApiError, Error, ErrorDetail, Result, ToHttpStatus};
pub use media::{CliMediaTools, MediaTools};
pub use pipeline::AudioPipeline;
pub use queue::DownloadQueue;
pub use rate_limiter::RateLimiter;
pub use records::{RecordStore, SqliteRecordStore, TrackRecord};
pub use retention::RetentionManager;
pub use status_store::StatusStore;
pub use types::{
    AudioStatus, DiskSpace, ErrorCode, QueueSnapshot, QueuedJob, StatusError, StatusEvent,
    StatusKind, StatusResponse, SweepReport, TrackId,
};

/// Run the pipeline until a termination signal arrives, then shut it down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use track_fetch::{AudioPipeline, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = AudioPipeline::connect(Config::default()).await?;
///     pipeline.start_background_tasks();
///
///     run_with_shutdown(pipeline).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(pipeline: AudioPipeline) -> Result<()> {
    wait_for_signal().await;
    pipeline.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}

//! Traits and types for fetch/transcode tooling

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::TrackId;

/// What to fetch and where to put it
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Track the download belongs to; names the output file
    pub id: TrackId,
    /// Remote reference handed to the fetch tool (e.g. a video URL)
    pub source_ref: String,
    /// Directory receiving `<id>.<ext>`
    pub output_dir: PathBuf,
}

/// Trait for the external media tools driven by the download queue
///
/// Implementations must:
/// - return promptly with [`Error::Cancelled`](crate::Error::Cancelled) once
///   `cancel` fires, after terminating any child process
/// - report failure (non-zero exit, missing output) as an `Err`; the queue
///   treats every error as retryable
///
/// # Examples
///
/// ```no_run
/// use track_fetch::config::Config;
/// use track_fetch::media::{CliMediaTools, FetchRequest, MediaTools};
/// use track_fetch::types::TrackId;
/// use std::path::Path;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::default();
/// let tools = CliMediaTools::from_config(&config.tools, &config.transcode)?;
///
/// let (progress_tx, _progress_rx) = tokio::sync::mpsc::unbounded_channel();
/// let request = FetchRequest {
///     id: TrackId(7),
///     source_ref: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into(),
///     output_dir: "music/.partial".into(),
/// };
/// let fetched = tools.fetch(&request, progress_tx, CancellationToken::new()).await?;
/// tools
///     .transcode(&fetched, Path::new("music/7.opus"), CancellationToken::new())
///     .await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait MediaTools: Send + Sync {
    /// Fetch best-quality audio for `request`
    ///
    /// Progress percentages are sent on `progress` as they are reported.
    /// Returns the path of the fetched file inside `request.output_dir`.
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: mpsc::UnboundedSender<f32>,
        cancel: CancellationToken,
    ) -> crate::Result<PathBuf>;

    /// Transcode `input` into the playable target format at `output`
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        cancel: CancellationToken,
    ) -> crate::Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

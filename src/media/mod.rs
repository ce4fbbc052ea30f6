//! Fetch and transcode tooling
//!
//! The download queue never spawns processes itself; it drives a
//! [`MediaTools`] implementation:
//!
//! - [`CliMediaTools`]: runs `yt-dlp` and `ffmpeg` as child processes
//! - test code supplies in-process fakes
//!
//! This module also owns the notion of a recognized audio file, shared by the
//! fetch stage (discovering what the tool produced) and retention sweeps
//! (deciding which files in the media directory are artifacts).

mod cli;
mod progress;
mod traits;

pub use cli::CliMediaTools;
pub use progress::parse_progress;
pub use traits::{FetchRequest, MediaTools};

use std::path::{Path, PathBuf};

use crate::types::TrackId;

/// Audio file extensions produced by the fetch tool or the transcoder
///
/// Covers every container yt-dlp's `bestaudio` may pick as well as the
/// transcode targets.
pub const RECOGNIZED_EXTENSIONS: &[&str] = &[
    "opus", "webm", "m4a", "mp3", "ogg", "oga", "aac", "flac", "wav",
];

/// Whether `path` has a recognized audio extension (case-insensitive)
pub fn is_recognized_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            RECOGNIZED_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Leading numeric id of an artifact file name (`"42.opus"` -> 42)
///
/// Returns `None` when the name does not start with digits followed by a dot.
pub fn parse_track_id(path: &Path) -> Option<TrackId> {
    let name = path.file_name()?.to_str()?;
    let (stem, _) = name.split_once('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Locate the file the fetch tool wrote for `id` in `dir`
///
/// The tool picks the container, so the file is found by its `<id>.` prefix
/// and a recognized extension. Intermediate names such as
/// `<id>.transcode.opus` or `<id>.webm.part` are not matched.
pub(crate) async fn find_fetched_file(dir: &Path, id: TrackId) -> std::io::Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((stem, ext)) = name.split_once('.') else {
            continue;
        };
        if stem == id.to_string()
            && RECOGNIZED_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

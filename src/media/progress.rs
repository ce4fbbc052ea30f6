//! Fetch progress parsing

use regex::Regex;
use std::sync::LazyLock;

/// Matches yt-dlp progress lines such as `[download]  42.3% of 3.51MiB at ...`
static PROGRESS_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[download\]\s+(\d+\.?\d*)%").ok());

/// Extract the download percentage from one line of fetch tool output
///
/// Returns `None` for lines without a progress marker. Values are clamped to
/// `0.0..=100.0`.
pub fn parse_progress(line: &str) -> Option<f32> {
    let re = PROGRESS_RE.as_ref()?;
    let captures = re.captures(line)?;
    let value: f32 = captures.get(1)?.as_str().parse().ok()?;
    Some(value.clamp(0.0, 100.0))
}

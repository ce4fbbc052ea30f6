//! CLI-based media tools using external yt-dlp and ffmpeg binaries

use async_trait::async_trait;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::progress::parse_progress;
use super::traits::{FetchRequest, MediaTools};
use crate::config::{ToolsConfig, TranscodeConfig};
use crate::error::{Error, Result};

/// Output lines kept for the error message of a failed run
const TAIL_LINES: usize = 5;

/// How long a signalled process group gets to exit before it is killed
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Media tools backed by the `yt-dlp` and `ffmpeg` executables
///
/// Each child runs in its own process group with the local binary directory
/// prepended to `PATH`, so helpers the tools spawn themselves are found there
/// first and are terminated together on cancellation.
#[derive(Debug, Clone)]
pub struct CliMediaTools {
    yt_dlp: PathBuf,
    ffmpeg: PathBuf,
    bin_dir: PathBuf,
    transcode: TranscodeConfig,
}

impl CliMediaTools {
    /// Create tools with explicit binary paths
    pub fn new(
        yt_dlp: PathBuf,
        ffmpeg: PathBuf,
        bin_dir: PathBuf,
        transcode: TranscodeConfig,
    ) -> Self {
        Self {
            yt_dlp,
            ffmpeg,
            bin_dir,
            transcode,
        }
    }

    /// Locate both binaries per the tools config
    ///
    /// Discovery order for each tool: the explicit config path, then
    /// `<bin_dir>/<tool>` (with the platform executable suffix), then `PATH`
    /// when `search_path` is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ToolNotFound`] for the first tool that cannot be located.
    pub fn from_config(tools: &ToolsConfig, transcode: &TranscodeConfig) -> Result<Self> {
        let yt_dlp = locate("yt-dlp", tools.yt_dlp_path.as_deref(), tools)?;
        let ffmpeg = locate("ffmpeg", tools.ffmpeg_path.as_deref(), tools)?;

        tracing::info!(
            yt_dlp = %yt_dlp.display(),
            ffmpeg = %ffmpeg.display(),
            "Media tools located"
        );

        Ok(Self::new(
            yt_dlp,
            ffmpeg,
            tools.bin_dir.clone(),
            transcode.clone(),
        ))
    }

    /// Arguments passed to yt-dlp for `request`
    fn fetch_args(&self, request: &FetchRequest) -> Vec<OsString> {
        let template = request
            .output_dir
            .join(format!("{}.%(ext)s", request.id));
        vec![
            "--format".into(),
            "bestaudio".into(),
            "--no-playlist".into(),
            "--newline".into(),
            "--force-overwrites".into(),
            "--no-part".into(),
            "--output".into(),
            template.into_os_string(),
            "--".into(),
            request.source_ref.clone().into(),
        ]
    }

    /// Arguments passed to ffmpeg to transcode `input` into `output`
    fn transcode_args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let t = &self.transcode;
        vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-i".into(),
            input.as_os_str().to_owned(),
            "-vn".into(),
            "-c:a".into(),
            t.codec.clone().into(),
            "-ar".into(),
            t.sample_rate.to_string().into(),
            "-ac".into(),
            t.channels.to_string().into(),
            "-b:a".into(),
            t.bitrate.clone().into(),
            "-f".into(),
            t.container.clone().into(),
            output.as_os_str().to_owned(),
        ]
    }

    /// Base command for `program` with the augmented PATH
    fn command(&self, program: &Path) -> Command {
        let mut command = Command::new(program);
        if let Some(path) = augmented_path(&self.bin_dir) {
            command.env("PATH", path);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            command.process_group(0);
        }
        command
    }
}

#[async_trait]
impl MediaTools for CliMediaTools {
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: mpsc::UnboundedSender<f32>,
        cancel: CancellationToken,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&request.output_dir).await?;

        let mut command = self.command(&self.yt_dlp);
        command.args(self.fetch_args(request));

        run_to_completion(command, "yt-dlp", &cancel, |line| {
            if let Some(percent) = parse_progress(line) {
                // The receiver disappears only when the job is gone
                progress.send(percent).ok();
            }
        })
        .await?;

        match super::find_fetched_file(&request.output_dir, request.id).await? {
            Some(path) => Ok(path),
            None => Err(Error::MissingOutput {
                stage: "fetch",
                path: request.output_dir.join(format!("{}.*", request.id)),
            }),
        }
    }

    async fn transcode(&self, input: &Path, output: &Path, cancel: CancellationToken) -> Result<()> {
        let mut command = self.command(&self.ffmpeg);
        command.args(self.transcode_args(input, output));

        run_to_completion(command, "ffmpeg", &cancel, |_| {}).await?;

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(Error::MissingOutput {
                stage: "transcode",
                path: output.to_path_buf(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cli-yt-dlp-ffmpeg"
    }
}

fn locate(tool: &str, explicit: Option<&Path>, tools: &ToolsConfig) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let local = tools
        .bin_dir
        .join(format!("{tool}{}", std::env::consts::EXE_SUFFIX));
    if local.is_file() {
        return Ok(local);
    }

    if tools.search_path
        && let Ok(found) = which::which(tool)
    {
        return Ok(found);
    }

    Err(Error::ToolNotFound {
        tool: tool.to_string(),
        bin_dir: tools.bin_dir.clone(),
    })
}

/// `bin_dir` followed by the inherited PATH entries
fn augmented_path(bin_dir: &Path) -> Option<OsString> {
    let mut entries = vec![bin_dir.to_path_buf()];
    if let Some(existing) = std::env::var_os("PATH") {
        entries.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(entries).ok()
}

/// What the output pump observed next
enum Pumped {
    Stdout(Option<String>),
    Stderr(Option<String>),
    Cancelled,
}

/// Spawn `command`, feed every output line to `on_line`, and wait for exit
///
/// Lines from stdout and stderr are interleaved as they arrive. A non-zero
/// exit becomes [`Error::ExternalTool`] carrying the last few lines of
/// output; cancellation terminates the process group and returns
/// [`Error::Cancelled`].
async fn run_to_completion(
    mut command: Command,
    tool: &'static str,
    cancel: &CancellationToken,
    mut on_line: impl FnMut(&str) + Send,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let mut child = command
        .spawn()
        .map_err(|e| Error::ExternalTool(format!("Failed to execute {tool}: {e}")))?;

    let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
    let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);

    while stdout.is_some() || stderr.is_some() {
        let pumped = tokio::select! {
            _ = cancel.cancelled() => Pumped::Cancelled,
            line = next_line(&mut stdout) => Pumped::Stdout(line),
            line = next_line(&mut stderr) => Pumped::Stderr(line),
        };

        let line = match pumped {
            Pumped::Cancelled => {
                terminate(&mut child, tool).await;
                return Err(Error::Cancelled);
            }
            Pumped::Stdout(None) => {
                stdout = None;
                continue;
            }
            Pumped::Stderr(None) => {
                stderr = None;
                continue;
            }
            Pumped::Stdout(Some(line)) | Pumped::Stderr(Some(line)) => line,
        };

        tracing::trace!(tool, line = %line, "tool output");
        on_line(&line);

        if !line.trim().is_empty() {
            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            terminate(&mut child, tool).await;
            return Err(Error::Cancelled);
        }
        status = child.wait() => status?,
    };

    if !status.success() {
        let detail = Vec::from(tail).join(" | ");
        return Err(Error::ExternalTool(format!(
            "{tool} exited with {status}: {detail}"
        )));
    }
    Ok(())
}

/// Next line of an optional stream; pending forever once the stream is gone
///
/// Read errors end the stream like EOF does.
async fn next_line<R: AsyncBufRead + Unpin>(lines: &mut Option<Lines<R>>) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

/// Best-effort termination of the child and everything it spawned
async fn terminate(child: &mut Child, tool: &'static str) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: plain syscall; the group id equals the child's pid because
            // the child was spawned with process_group(0)
            unsafe {
                libc::killpg(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    {
        child.start_kill().ok();
    }

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(_) => tracing::debug!(tool, "Cancelled process exited"),
        Err(_) => {
            tracing::warn!(tool, "Process ignored SIGTERM, killing");
            child.kill().await.ok();
        }
    }
}

//! Free-space monitoring that triggers early retention sweeps
//!
//! Every check compares the available fraction of the filesystem holding the
//! media directory with the configured threshold and runs a sweep right away
//! when space is short. Probe failures skip the cycle.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::activity_log::ActivityLog;
use crate::error::{Error, Result};
use crate::retention::RetentionManager;
use crate::types::{DiskSpace, SweepReport};

/// Query capacity figures for the filesystem containing `path`
///
/// Uses `statvfs` on Unix and `GetDiskFreeSpaceExW` on Windows.
pub fn check_disk_space(path: &Path) -> Result<DiskSpace> {
    probe(path).map_err(|e| {
        Error::DiskSpaceCheckFailed(format!("{}: {e}", path.display()))
    })
}

fn probe(path: &Path) -> std::io::Result<DiskSpace> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid NUL-terminated string and `stat` is only
        // read after statvfs reports success
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_frsize is the fundamental block size the counts are expressed in
            let block = stat.f_frsize as u64;
            let total = (stat.f_blocks as u64).saturating_mul(block);
            let available = (stat.f_bavail as u64).saturating_mul(block);
            let free = (stat.f_bfree as u64).saturating_mul(block);
            Ok(DiskSpace {
                available,
                total,
                used: total.saturating_sub(free),
            })
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is NUL-terminated and the out pointers reference
        // live, aligned u64 locals read only after success
        unsafe {
            let mut available: u64 = 0;
            let mut total: u64 = 0;
            let mut free: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut available as *mut u64 as *mut _,
                &mut total as *mut u64 as *mut _,
                &mut free as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(DiskSpace {
                available,
                total,
                used: total.saturating_sub(free),
            })
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = path;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}

/// Source of disk capacity figures
#[async_trait]
pub trait SpaceProbe: Send + Sync {
    /// Capacity of the filesystem containing `path`
    async fn disk_space(&self, path: &Path) -> Result<DiskSpace>;
}

/// The real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

#[async_trait]
impl SpaceProbe for SystemProbe {
    async fn disk_space(&self, path: &Path) -> Result<DiskSpace> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || check_disk_space(&path))
            .await
            .map_err(|e| Error::DiskSpaceCheckFailed(format!("probe task failed: {e}")))?
    }
}

/// Something that can reclaim space on demand
#[async_trait]
pub trait Sweep: Send + Sync {
    /// Reclaim space now
    async fn sweep(&self) -> Result<SweepReport>;
}

#[async_trait]
impl Sweep for RetentionManager {
    async fn sweep(&self) -> Result<SweepReport> {
        RetentionManager::sweep(self).await
    }
}

/// Triggers a sweep when free space drops below a threshold
#[derive(Clone)]
pub struct DiskGuard {
    probe: Arc<dyn SpaceProbe>,
    sweeper: Arc<dyn Sweep>,
    activity: ActivityLog,
    path: PathBuf,
    threshold: f64,
}

impl DiskGuard {
    /// Watch the filesystem holding `path`; `threshold` is a fraction in `(0, 1]`
    pub fn new(
        probe: Arc<dyn SpaceProbe>,
        sweeper: Arc<dyn Sweep>,
        activity: ActivityLog,
        path: impl Into<PathBuf>,
        threshold: f64,
    ) -> Self {
        Self {
            probe,
            sweeper,
            activity,
            path: path.into(),
            threshold,
        }
    }

    /// Path whose filesystem is watched
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current capacity figures of the watched filesystem
    pub async fn disk_space(&self) -> Result<DiskSpace> {
        self.probe.disk_space(&self.path).await
    }

    /// Check once and sweep if `available / total < threshold`
    ///
    /// Returns the sweep report when a sweep ran. Probe failures and
    /// filesystems reporting zero capacity skip the cycle.
    pub async fn monitor_disk_space(&self) -> Option<SweepReport> {
        let space = match self.probe.disk_space(&self.path).await {
            Ok(space) => space,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Disk space check failed, skipping"
                );
                return None;
            }
        };

        let Some(fraction) = space.available_fraction() else {
            tracing::warn!(path = %self.path.display(), "Filesystem reports zero capacity, skipping");
            return None;
        };

        tracing::debug!(
            available = space.available,
            total = space.total,
            fraction,
            threshold = self.threshold,
            "Disk space checked"
        );

        if fraction >= self.threshold {
            return None;
        }

        self.activity
            .warn(
                None,
                format!(
                    "Low disk space ({:.1}% free), running retention sweep",
                    fraction * 100.0
                ),
                None,
            )
            .await;

        match self.sweeper.sweep().await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "Low-disk retention sweep failed");
                None
            }
        }
    }

    /// Check every `interval`, starting immediately, until `shutdown` fires
    pub fn spawn_periodic(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let guard = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        guard.monitor_disk_space().await;
                    }
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Disk monitor stopped");
                        break;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for DiskGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskGuard")
            .field("path", &self.path)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

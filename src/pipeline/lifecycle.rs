//! Background tasks and graceful shutdown.

use std::time::Duration;

use crate::error::Result;

use super::AudioPipeline;

/// How long shutdown waits for background tasks
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl AudioPipeline {
    /// Spawn the retention timer and the disk monitor
    ///
    /// Both run once immediately and then on their configured intervals until
    /// [`shutdown`](Self::shutdown). Calling this again is a no-op.
    pub fn start_background_tasks(&self) {
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !tasks.is_empty() || self.shutdown.is_cancelled() {
            tracing::debug!("Background tasks already started or shutting down");
            return;
        }

        let retention = &self.config.retention;
        if retention.enabled {
            tasks.push(
                self.retention
                    .spawn_periodic(retention.sweep_interval, self.shutdown.child_token()),
            );
            tracing::info!(
                interval_secs = retention.sweep_interval.as_secs(),
                max_age_secs = retention.max_age.as_secs(),
                "Retention sweeps scheduled"
            );
        }

        let disk = &self.config.disk_guard;
        if disk.enabled {
            tasks.push(
                self.disk_guard
                    .spawn_periodic(disk.check_interval, self.shutdown.child_token()),
            );
            tracing::info!(
                interval_secs = disk.check_interval.as_secs(),
                threshold = disk.threshold,
                "Disk space monitor scheduled"
            );
        }
    }

    /// Stop background tasks and the download queue
    ///
    /// 1. Cancels the background tasks and the running job
    /// 2. Waits for the queue processor to exit
    /// 3. Waits (bounded) for background tasks to finish
    ///
    /// Jobs still queued are reported as interrupted after the next start.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");
        self.shutdown.cancel();

        self.queue.shutdown().await;

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();

        let wait_all = async {
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "Background task ended abnormally");
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await.is_err() {
            tracing::warn!("Timeout waiting for background tasks, proceeding with shutdown");
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Serve the REST API until shutdown
    pub fn spawn_api_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let pipeline = self.clone();
        tokio::spawn(async move { crate::api::start_api_server(pipeline).await })
    }
}

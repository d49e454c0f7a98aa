//! Background and final remote sync, serialized by a single mutex.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use codetrack_sync::{SyncError, SyncJob, SyncReport};

use crate::schedule::{schedule_every_detached, ScheduleHandle};

/// Outcome of one scheduled sync attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAttempt {
    Completed,
    Skipped,
    Failed(String),
}

/// Wraps a [`SyncJob`] so that at most one run is in flight at a time.
/// Periodic runs skip when busy; the final run waits its turn.
#[derive(Clone)]
pub struct BackgroundRemoteSync {
    job: Arc<dyn SyncJob>,
    lock: Arc<Mutex<()>>,
}

impl BackgroundRemoteSync {
    pub fn new(job: Arc<dyn SyncJob>) -> Self {
        Self {
            job,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn run_periodic(&self) -> SyncAttempt {
        self.run_periodic_unless(&CancellationToken::new()).await
    }

    /// A periodic attempt that backs off once `cancelled` has fired, so
    /// nothing runs after the final run has taken over.
    async fn run_periodic_unless(&self, cancelled: &CancellationToken) -> SyncAttempt {
        let Ok(_guard) = self.lock.clone().try_lock_owned() else {
            info!("Sync already in progress. Skipping");
            return SyncAttempt::Skipped;
        };
        if cancelled.is_cancelled() {
            debug!("sync schedule cancelled; leaving the store to the final run");
            return SyncAttempt::Skipped;
        }

        info!("Sync local files with remote");
        match self.run_job().await {
            Ok(report) => {
                log_report(&report);
                SyncAttempt::Completed
            }
            Err(err) => {
                warn!(error = %err, "Remote sync failed. Will retry later.");
                SyncAttempt::Failed(err.to_string())
            }
        }
    }

    /// Last sync before exit. Errors are logged and swallowed.
    pub async fn final_run(&self) -> SyncAttempt {
        let _guard = self.lock.lock().await;
        info!("Upload remaining parts and finalise recording session");
        match self.run_job().await {
            Ok(report) => {
                log_report(&report);
                SyncAttempt::Completed
            }
            Err(err) => {
                error!(
                    "File upload failed. Some files might not have been uploaded. Reason: {err}"
                );
                SyncAttempt::Failed(err.to_string())
            }
        }
    }

    /// Every tick makes its own attempt; a tick that lands while a run is
    /// in flight is skipped rather than queued.
    pub fn schedule_every(&self, every: Duration) -> ScheduleHandle {
        let sync = self.clone();
        schedule_every_detached(
            "sync",
            tracing::info_span!(parent: None, "upload"),
            every,
            move |cancelled| {
                let sync = sync.clone();
                async move {
                    sync.run_periodic_unless(&cancelled).await;
                }
            },
        )
    }

    async fn run_job(&self) -> Result<SyncReport, SyncError> {
        let job = self.job.clone();
        tokio::task::spawn_blocking(move || job.run_once())
            .await
            .map_err(|err| SyncError::Destination {
                reason: format!("sync task join error: {err}"),
            })?
    }
}

fn log_report(report: &SyncReport) {
    info!(
        uploaded = report.uploaded.len(),
        unchanged = report.unchanged,
        locked = report.skipped_locked,
        bytes = report.bytes,
        "sync completed",
    );
}

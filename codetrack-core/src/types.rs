//! Domain types shared by the sync engine and the supervisor.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Value of `--config` / `--sourcecode` that switches the feature off.
pub const DISABLED_SENTINEL: &str = "none";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Returns `None` when `raw` is the disabled sentinel, the path otherwise.
pub fn enabled_path(raw: &str) -> Option<PathBuf> {
    if raw == DISABLED_SENTINEL {
        None
    } else {
        Some(PathBuf::from(raw))
    }
}

/// Timestamp used in capture and log file names, e.g. `20250114T093012`.
pub fn file_timestamp(at: DateTime<Local>) -> String {
    at.format("%Y%m%dT%H%M%S").to_string()
}

// ---------------------------------------------------------------------------
// Worker liveness
// ---------------------------------------------------------------------------

/// Liveness of a background worker. Transitions are strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Created,
    Running,
    StopRequested,
    Stopped,
}

impl WorkerState {
    /// `Running` and `StopRequested` count as alive.
    pub fn is_alive(self) -> bool {
        matches!(self, WorkerState::Running | WorkerState::StopRequested)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Created => "created",
            WorkerState::Running => "running",
            WorkerState::StopRequested => "stop_requested",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Upload statistics
// ---------------------------------------------------------------------------

/// Progress of the current (or last) upload session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UploadStats {
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
    pub elapsed: Duration,
}

impl UploadStats {
    /// Fraction uploaded in `0.0..=1.0`. An empty session counts as complete.
    pub fn upload_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        self.uploaded_bytes as f64 / self.total_bytes as f64
    }

    pub fn total_megabytes(&self) -> f64 {
        self.total_bytes as f64 / BYTES_PER_MB
    }

    pub fn megabytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.uploaded_bytes as f64 / BYTES_PER_MB / secs
    }
}

//! Upload progress reporting.
//!
//! The sync engine calls a [`ProgressListener`] from whichever thread runs
//! the upload; [`UploadStatsListener`] keeps the latest [`UploadStats`] so
//! that the metrics reporter can read them concurrently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use codetrack_core::UploadStats;

/// Callbacks issued by one sync run.
pub trait ProgressListener: Send + Sync {
    /// A run is about to upload `total_bytes` across all pending files.
    fn upload_started(&self, total_bytes: u64);
    /// `bytes` more bytes reached the destination.
    fn bytes_uploaded(&self, bytes: u64);
    /// The run ended, successfully or not.
    fn upload_finished(&self);
}

#[derive(Debug, Clone, Copy)]
struct Session {
    total_bytes: u64,
    uploaded_bytes: u64,
    started_at: Instant,
    finished_at: Option<Instant>,
}

/// Thread-safe sink retaining the stats of the current or last session.
#[derive(Debug, Default)]
pub struct UploadStatsListener {
    session: Mutex<Option<Session>>,
    uploading: AtomicBool,
}

impl UploadStatsListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_currently_uploading(&self) -> bool {
        self.uploading.load(Ordering::SeqCst)
    }

    /// Stats of the session in progress, or of the last one. `None` before
    /// any run.
    pub fn current_stats(&self) -> Option<UploadStats> {
        let guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
        guard.map(|session| {
            let end = session.finished_at.unwrap_or_else(Instant::now);
            UploadStats {
                total_bytes: session.total_bytes,
                uploaded_bytes: session.uploaded_bytes,
                elapsed: end.saturating_duration_since(session.started_at),
            }
        })
    }

    fn with_session(&self, update: impl FnOnce(&mut Option<Session>)) {
        let mut guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
        update(&mut guard);
    }
}

impl ProgressListener for UploadStatsListener {
    fn upload_started(&self, total_bytes: u64) {
        self.with_session(|session| {
            *session = Some(Session {
                total_bytes,
                uploaded_bytes: 0,
                started_at: Instant::now(),
                finished_at: None,
            });
        });
        self.uploading.store(true, Ordering::SeqCst);
    }

    fn bytes_uploaded(&self, bytes: u64) {
        self.with_session(|session| {
            if let Some(session) = session.as_mut() {
                session.uploaded_bytes = session.uploaded_bytes.saturating_add(bytes);
            }
        });
    }

    fn upload_finished(&self) {
        self.uploading.store(false, Ordering::SeqCst);
        self.with_session(|session| {
            if let Some(session) = session.as_mut() {
                session.finished_at = Some(Instant::now());
            }
        });
    }
}

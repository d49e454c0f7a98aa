//! One-shot directory-to-destination sync.
//!
//! A run collects every file under the local folder that passes the
//! [`Filters`], skips files still being written (those with a sibling
//! `<file>.lock` marker) and files whose remote copy already has the same
//! size, then uploads the rest.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::destination::RemoteDestination;
use crate::error::{io_err, SyncError};
use crate::filters::Filters;
use crate::progress::ProgressListener;

/// Marker suffix written next to a file while its producer holds it open.
pub const LOCK_SUFFIX: &str = ".lock";

/// Run-once contract consumed by the upload scheduler.
pub trait SyncJob: Send + Sync + 'static {
    /// Push everything that is pending. Blocking.
    fn run_once(&self) -> Result<SyncReport, SyncError>;
}

/// Outcome of a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub uploaded: Vec<String>,
    pub unchanged: usize,
    pub skipped_locked: usize,
    pub bytes: u64,
}

pub struct RemoteSync {
    local_folder: PathBuf,
    filters: Filters,
    destination: Arc<dyn RemoteDestination>,
    listener: Arc<dyn ProgressListener>,
}

impl RemoteSync {
    pub fn new(
        local_folder: impl Into<PathBuf>,
        filters: Filters,
        destination: Arc<dyn RemoteDestination>,
        listener: Arc<dyn ProgressListener>,
    ) -> Self {
        Self {
            local_folder: local_folder.into(),
            filters,
            destination,
            listener,
        }
    }

    fn pending_uploads(&self, report: &mut SyncReport) -> Result<Vec<(String, PathBuf, u64)>, SyncError> {
        let mut pending = Vec::new();
        for path in collect_files(&self.local_folder)? {
            if !self.filters.matches(&path) {
                continue;
            }
            if has_lock_marker(&path) {
                tracing::debug!("skipping {} while it is still open", path.display());
                report.skipped_locked += 1;
                continue;
            }
            let size = match fs::metadata(&path) {
                Ok(meta) => meta.len(),
                // Rotated away between listing and stat.
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(io_err(&path, err)),
            };
            let key = object_key(&self.local_folder, &path);
            if self.destination.object_size(&key)? == Some(size) {
                report.unchanged += 1;
                continue;
            }
            pending.push((key, path, size));
        }
        Ok(pending)
    }
}

impl SyncJob for RemoteSync {
    fn run_once(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let pending = self.pending_uploads(&mut report)?;
        let total: u64 = pending.iter().map(|(_, _, size)| size).sum();

        self.listener.upload_started(total);
        let outcome = pending.into_iter().try_for_each(|(key, path, _)| {
            let stored = self
                .destination
                .put_object(&key, &path, self.listener.as_ref())?;
            tracing::debug!("uploaded {key} ({stored} bytes)");
            report.bytes += stored;
            report.uploaded.push(key);
            Ok::<(), SyncError>(())
        });
        self.listener.upload_finished();
        outcome?;

        tracing::info!(
            "sync finished: {} uploaded, {} unchanged, {} still open",
            report.uploaded.len(),
            report.unchanged,
            report.skipped_locked
        );
        Ok(report)
    }
}

/// Key relative to the local folder, always `/`-separated.
fn object_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn has_lock_marker(path: &Path) -> bool {
    let mut marker = path.as_os_str().to_owned();
    marker.push(LOCK_SUFFIX);
    Path::new(&marker).exists()
}

/// Breadth-first listing of regular files under `root`, sorted.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>, SyncError> {
    let mut dirs = vec![root.to_path_buf()];
    let mut files = Vec::new();
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&current, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if ty.is_dir() {
                dirs.push(entry.path());
            } else if ty.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

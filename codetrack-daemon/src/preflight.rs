use std::fs;
use std::path::Path;

use crate::error::{io_err, DaemonError};

const ONE_MB: u64 = 1024 * 1024;
const ONE_GB: u64 = 1024 * ONE_MB;

/// Checks the volume holding `path` for at least `minimum_gb` GiB free.
/// A minimum of 0 skips the check.
pub fn has_enough_free_diskspace(minimum_gb: u64, path: &Path) -> Result<bool, DaemonError> {
    if minimum_gb == 0 {
        tracing::info!("Skipping diskspace check and proceeding to run the app.");
        return Ok(true);
    }

    tracing::info!("Checking diskspace");
    let available = fs2::available_space(path).map_err(|e| io_err(path, e))?;
    tracing::info!(
        "Available disk space on the volume (or drive) '{}': {}GB ({:.3}MB)",
        path.display(),
        available / ONE_GB,
        available as f64 / ONE_MB as f64,
    );
    if available < minimum_gb.saturating_mul(ONE_GB) {
        tracing::error!(
            "Sorry, you need at least {minimum_gb}GB of free disk space on this volume (or drive), in order to run the source code tracking app."
        );
        tracing::warn!(
            "Please free up some disk space on this volume (or drive) and try running the source code tracking app again."
        );
        return Ok(false);
    }
    Ok(true)
}

pub fn create_missing_parent_directories(store: &Path) -> Result<(), DaemonError> {
    if store.exists() {
        return Ok(());
    }
    fs::create_dir_all(store).map_err(|e| io_err(store, e))
}

/// Deletes every `*.lock` marker under `store` left behind by a previous run.
/// Returns how many were removed. Failures are logged and skipped.
pub fn remove_old_locks(store: &Path) -> usize {
    let mut removed = 0;
    let mut dirs = vec![store.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::error!(path = %dir.display(), error = %err, "Failed to clean old locks");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
                continue;
            }
            let is_lock = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(codetrack_sync::LOCK_SUFFIX));
            if !is_lock {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "Failed to clean old lock");
                }
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn zero_minimum_skips_the_check() {
        let missing = Path::new("/definitely/not/a/real/volume");
        assert!(has_enough_free_diskspace(0, missing).expect("skip"));
    }

    #[test]
    fn absurd_minimum_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        assert!(!has_enough_free_diskspace(u64::MAX / ONE_GB, dir.path()).expect("check"));
    }

    #[test]
    fn creates_nested_store_folder() {
        let dir = TempDir::new().expect("tempdir");
        let store = dir.path().join("a/b/store");
        create_missing_parent_directories(&store).expect("create");
        assert!(store.is_dir());
        create_missing_parent_directories(&store).expect("idempotent");
    }

    #[test]
    fn removes_lock_markers_recursively_and_keeps_data() {
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir_all(dir.path().join("nested")).expect("nested");
        fs::write(dir.path().join("codetrack_1.log"), "log").expect("log");
        fs::write(dir.path().join("codetrack_1.log.lock"), "").expect("lock");
        fs::write(dir.path().join("nested/sourcecode.srcs.lock"), "").expect("lock");

        assert_eq!(remove_old_locks(dir.path()), 2);
        assert!(dir.path().join("codetrack_1.log").exists());
        assert!(!dir.path().join("nested/sourcecode.srcs.lock").exists());
    }
}

//! Remote destinations the local store folder is pushed to.
//!
//! [`DirectoryDestination`] treats a directory as the object-store endpoint:
//! objects live at `<root>/<bucket>/<prefix><key>`, the bucket directory must
//! already exist (the equivalent of a provisioned bucket), and every object
//! is written through a `.tmp` file and renamed into place.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use codetrack_core::RemoteConfig;

use crate::error::{io_err, SyncError};
use crate::progress::ProgressListener;

pub const SESSION_START_KEY: &str = "last_sync_start.json";
pub const SESSION_STOP_KEY: &str = "last_sync_stop.json";

/// Payload of the session start/stop markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMarker {
    pub event: String,
    pub at: DateTime<Utc>,
    pub timestamp_ms: i64,
}

impl SessionMarker {
    fn now(event: &str) -> Self {
        let at = Utc::now();
        Self {
            event: event.to_string(),
            at,
            timestamp_ms: at.timestamp_millis(),
        }
    }
}

const COPY_CHUNK: usize = 64 * 1024;

/// Contract consumed by [`crate::RemoteSync`] and the session bookkeeping.
pub trait RemoteDestination: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Cheap reachability check; fails if the bucket does not exist.
    fn probe(&self) -> Result<(), SyncError>;

    /// Marks the start of a recording session. Doubles as a write-permission check.
    fn start_session(&self) -> Result<(), SyncError>;

    fn stop_session(&self) -> Result<(), SyncError>;

    /// Size of the stored object, `None` if absent.
    fn object_size(&self, key: &str) -> Result<Option<u64>, SyncError>;

    /// Upload `source` as `key`, reporting progress as bytes are written.
    /// Returns the number of bytes stored.
    fn put_object(
        &self,
        key: &str,
        source: &Path,
        progress: &dyn ProgressListener,
    ) -> Result<u64, SyncError>;
}

// ---------------------------------------------------------------------------
// No-op destination
// ---------------------------------------------------------------------------

/// Used when remote sync is disabled: accepts everything and stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpDestination;

impl RemoteDestination for NoOpDestination {
    fn describe(&self) -> String {
        "no-op destination (sync disabled)".to_string()
    }

    fn probe(&self) -> Result<(), SyncError> {
        Ok(())
    }

    fn start_session(&self) -> Result<(), SyncError> {
        Ok(())
    }

    fn stop_session(&self) -> Result<(), SyncError> {
        Ok(())
    }

    fn object_size(&self, _key: &str) -> Result<Option<u64>, SyncError> {
        Ok(None)
    }

    fn put_object(
        &self,
        _key: &str,
        source: &Path,
        progress: &dyn ProgressListener,
    ) -> Result<u64, SyncError> {
        let size = fs::metadata(source).map_err(|e| io_err(source, e))?.len();
        progress.bytes_uploaded(size);
        Ok(size)
    }
}

// ---------------------------------------------------------------------------
// Directory-backed object store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DirectoryDestination {
    root: PathBuf,
    bucket: String,
    prefix: String,
}

impl DirectoryDestination {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(&config.root, &config.bucket, &config.prefix)
    }

    fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    /// `<root>/<bucket>/<prefix><key>`. Pure, no I/O.
    pub fn object_path(&self, key: &str) -> PathBuf {
        let mut path = self.bucket_dir();
        let full_key = format!("{}{}", self.prefix, key);
        for segment in full_key.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    fn ensure_bucket(&self) -> Result<(), SyncError> {
        let bucket = self.bucket_dir();
        if bucket.is_dir() {
            Ok(())
        } else {
            Err(SyncError::Destination {
                reason: format!("bucket '{}' does not exist under {}", self.bucket, self.root.display()),
            })
        }
    }

    fn put_marker(&self, key: &str, event: &str) -> Result<(), SyncError> {
        self.ensure_bucket()?;
        let path = self.object_path(key);
        let content = serde_json::to_vec_pretty(&SessionMarker::now(event))?;
        write_atomically(&path, |file| file.write_all(&content))?;
        Ok(())
    }

    /// Reads back a session marker, if one has been written.
    pub fn read_marker(&self, key: &str) -> Result<Option<SessionMarker>, SyncError> {
        let path = self.object_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(&path, err)),
        }
    }
}

impl RemoteDestination for DirectoryDestination {
    fn describe(&self) -> String {
        format!("{}/{}", self.bucket_dir().display(), self.prefix)
    }

    fn probe(&self) -> Result<(), SyncError> {
        self.ensure_bucket()
    }

    fn start_session(&self) -> Result<(), SyncError> {
        self.put_marker(SESSION_START_KEY, "start")
    }

    fn stop_session(&self) -> Result<(), SyncError> {
        self.put_marker(SESSION_STOP_KEY, "stop")
    }

    fn object_size(&self, key: &str) -> Result<Option<u64>, SyncError> {
        let path = self.object_path(key);
        match fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(&path, err)),
        }
    }

    fn put_object(
        &self,
        key: &str,
        source: &Path,
        progress: &dyn ProgressListener,
    ) -> Result<u64, SyncError> {
        self.ensure_bucket()?;
        let mut input = File::open(source).map_err(|e| io_err(source, e))?;
        let target = self.object_path(key);
        write_atomically(&target, |output| {
            let mut buffer = vec![0u8; COPY_CHUNK];
            let mut copied = 0u64;
            loop {
                let read = input.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                output.write_all(&buffer[..read])?;
                copied += read as u64;
                progress.bytes_uploaded(read as u64);
            }
            Ok(copied)
        })
    }
}

/// Write through `<path>.codetrack.tmp`, then rename onto `path`.
///
/// Permission failures surface as [`SyncError::Destination`].
fn write_atomically<T>(
    path: &Path,
    write: impl FnOnce(&mut File) -> io::Result<T>,
) -> Result<T, SyncError> {
    let tmp = PathBuf::from(format!("{}.codetrack.tmp", path.display()));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| destination_err(parent, e))?;
    }

    let result = File::create(&tmp)
        .and_then(|mut file| {
            let value = write(&mut file)?;
            file.flush()?;
            Ok(value)
        })
        .map_err(|e| destination_err(&tmp, e));
    let value = match result {
        Ok(value) => value,
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
    };

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(destination_err(path, e));
    }
    Ok(value)
}

fn destination_err(path: &Path, source: io::Error) -> SyncError {
    if source.kind() == ErrorKind::PermissionDenied {
        SyncError::Destination {
            reason: format!("permission denied writing {}", path.display()),
        }
    } else {
        io_err(path, source)
    }
}

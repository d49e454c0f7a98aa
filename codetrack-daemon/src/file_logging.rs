//! Log files in the local store folder, picked up by the sync job.
//!
//! Each file is named `codetrack_<timestamp>_<seq>.log` and carries a sibling
//! `.lock` marker while it is open, so the sync job leaves it alone until it
//! is closed by a rotation (forced, or because it grew past [`MAX_LOG_BYTES`]).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{io_err, DaemonError};
use crate::paths::{lock_marker_path, log_file_path};

/// Maximum log file size before rotation (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Closes the current log file so it becomes eligible for upload.
pub trait LogRotation: Send + Sync {
    fn force_rotation(&self) -> Result<(), DaemonError>;
}

struct OpenLog {
    path: PathBuf,
    lock: PathBuf,
    file: File,
    written: u64,
}

#[derive(Default)]
struct LogState {
    current: Option<OpenLog>,
    next_seq: u32,
}

pub struct LocalFileLogging {
    store: PathBuf,
    timestamp: String,
    max_bytes: u64,
    state: Mutex<LogState>,
}

impl LocalFileLogging {
    pub fn new(store: &Path, timestamp: impl Into<String>) -> Self {
        Self::with_max_bytes(store, timestamp, MAX_LOG_BYTES)
    }

    pub fn with_max_bytes(store: &Path, timestamp: impl Into<String>, max_bytes: u64) -> Self {
        Self {
            store: store.to_path_buf(),
            timestamp: timestamp.into(),
            max_bytes,
            state: Mutex::new(LogState::default()),
        }
    }

    /// Opens a new log file. No-op if one is already open.
    pub fn start(&self) -> Result<PathBuf, DaemonError> {
        let mut state = self.lock_state();
        if let Some(current) = &state.current {
            return Ok(current.path.clone());
        }
        self.open_next(&mut state)
    }

    /// Closes the current log file, if any. Later log lines only reach stderr.
    pub fn stop(&self) -> Result<(), DaemonError> {
        let mut state = self.lock_state();
        close(state.current.take())
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.lock_state().current.as_ref().map(|log| log.path.clone())
    }

    pub fn make_writer(self: &Arc<Self>) -> FileLogWriter {
        FileLogWriter(self.clone())
    }

    fn lock_state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open_next(&self, state: &mut LogState) -> Result<PathBuf, DaemonError> {
        state.next_seq += 1;
        let path = log_file_path(&self.store, &self.timestamp, state.next_seq);
        let lock = lock_marker_path(&path);
        fs::write(&lock, b"").map_err(|e| io_err(&lock, e))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        state.current = Some(OpenLog {
            path: path.clone(),
            lock,
            file,
            written: 0,
        });
        Ok(path)
    }

    fn write_line(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock_state();
        let Some(current) = state.current.as_mut() else {
            return Ok(buf.len());
        };
        current.file.write_all(buf)?;
        current.written += buf.len() as u64;
        if current.written >= self.max_bytes {
            close(state.current.take()).map_err(|err| io::Error::other(err.to_string()))?;
            self.open_next(&mut state)
                .map_err(|err| io::Error::other(err.to_string()))?;
        }
        Ok(buf.len())
    }
}

impl LogRotation for LocalFileLogging {
    fn force_rotation(&self) -> Result<(), DaemonError> {
        let mut state = self.lock_state();
        close(state.current.take())?;
        self.open_next(&mut state).map(|_| ())
    }
}

fn close(log: Option<OpenLog>) -> Result<(), DaemonError> {
    let Some(mut log) = log else {
        return Ok(());
    };
    log.file.flush().map_err(|e| io_err(&log.path, e))?;
    drop(log.file);
    match fs::remove_file(&log.lock) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(&log.lock, err)),
    }
}

/// `MakeWriter` handing formatted events to the current log file.
#[derive(Clone)]
pub struct FileLogWriter(Arc<LocalFileLogging>);

impl Write for FileLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_line(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for FileLogWriter {
    type Writer = FileLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn env_filter(debug: bool) -> EnvFilter {
    let default = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Logs to stderr and, while a file is open, to the local store folder.
pub fn init_tracing(debug: bool, logging: &Arc<LocalFileLogging>) {
    let stderr = fmt::layer().with_target(false).with_writer(io::stderr);
    let file = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(logging.make_writer());
    let _ = tracing_subscriber::registry()
        .with(env_filter(debug))
        .with(stderr)
        .with(file)
        .try_init();
}

pub fn init_stderr_tracing(debug: bool) {
    let _ = fmt()
        .with_env_filter(env_filter(debug))
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

//! Snapshot engine behind the source-code recording worker.
//!
//! A recording is a JSON-lines file. Each line is one [`SnapshotRecord`]:
//! key snapshots list every tracked file, diff snapshots list only files that
//! changed since the previous snapshot plus the paths that disappeared.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{io_err, DaemonError};
use crate::paths::{lock_marker_path, KEY_SNAPSHOT_SPACING, MAX_RECORDING_DURATION, SNAPSHOT_EVERY};

/// Files larger than this are hashed but their content is not embedded.
pub const MAX_EMBEDDED_BYTES: u64 = 1024 * 1024;

const SKIPPED_DIRS: &[&str] = &[".git"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderOptions {
    pub snapshot_every: Duration,
    pub key_snapshot_spacing: u64,
    pub max_duration: Duration,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            snapshot_every: SNAPSHOT_EVERY,
            key_snapshot_spacing: KEY_SNAPSHOT_SPACING,
            max_duration: MAX_RECORDING_DURATION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Key,
    Diff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub sha256: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub index: u64,
    pub kind: SnapshotKind,
    /// Milliseconds since the recording was opened.
    pub offset_ms: u64,
    pub captured_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub files: Vec<FileEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SnapshotSummary {
    pub index: u64,
    pub kind: SnapshotKind,
    pub files: usize,
    pub elapsed: Duration,
}

pub struct SourceCodeRecorder {
    source_dir: PathBuf,
    output: PathBuf,
    lock: PathBuf,
    writer: BufWriter<File>,
    key_spacing: u64,
    next_index: u64,
    previous: BTreeMap<String, String>,
    opened_at: Instant,
}

impl SourceCodeRecorder {
    /// Creates `output` (truncating) and its `.lock` marker.
    pub fn open(source_dir: &Path, output: &Path, key_spacing: u64) -> Result<Self, DaemonError> {
        if !source_dir.is_dir() {
            return Err(io_err(
                source_dir,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "source code folder does not exist",
                ),
            ));
        }
        let lock = lock_marker_path(output);
        fs::write(&lock, b"").map_err(|e| io_err(&lock, e))?;
        let file = File::create(output).map_err(|e| io_err(output, e))?;

        Ok(Self {
            source_dir: source_dir.to_path_buf(),
            output: output.to_path_buf(),
            lock,
            writer: BufWriter::new(file),
            key_spacing: key_spacing.max(1),
            next_index: 0,
            previous: BTreeMap::new(),
            opened_at: Instant::now(),
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Captures the current state of the source folder and appends it.
    pub fn snapshot(&mut self, tag: Option<&str>) -> Result<SnapshotSummary, DaemonError> {
        let started = Instant::now();
        let index = self.next_index;
        let kind = if index % self.key_spacing == 0 {
            SnapshotKind::Key
        } else {
            SnapshotKind::Diff
        };

        let mut current = BTreeMap::new();
        let mut files = Vec::new();
        for path in collect_files(&self.source_dir)? {
            let Some(relative) = relative_key(&self.source_dir, &path) else {
                continue;
            };
            let bytes = fs::read(&path).map_err(|e| io_err(&path, e))?;
            let sha256 = hex::encode(Sha256::digest(&bytes));
            let changed = self.previous.get(&relative) != Some(&sha256);
            if kind == SnapshotKind::Key || changed {
                files.push(FileEntry {
                    path: relative.clone(),
                    sha256: sha256.clone(),
                    size: bytes.len() as u64,
                    content: embeddable(bytes),
                });
            }
            current.insert(relative, sha256);
        }
        let removed = match kind {
            SnapshotKind::Key => Vec::new(),
            SnapshotKind::Diff => self
                .previous
                .keys()
                .filter(|path| !current.contains_key(*path))
                .cloned()
                .collect(),
        };

        let record = SnapshotRecord {
            index,
            kind,
            offset_ms: self.opened_at.elapsed().as_millis() as u64,
            captured_at: chrono::Local::now().to_rfc3339(),
            tag: tag.map(str::to_string),
            files,
            removed,
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer
            .write_all(b"\n")
            .and_then(|()| self.writer.flush())
            .map_err(|e| io_err(&self.output, e))?;

        self.previous = current;
        self.next_index += 1;
        Ok(SnapshotSummary {
            index,
            kind,
            files: record.files.len(),
            elapsed: started.elapsed(),
        })
    }

    /// Flushes the recording and removes the `.lock` marker.
    pub fn close(mut self) -> Result<PathBuf, DaemonError> {
        self.writer.flush().map_err(|e| io_err(&self.output, e))?;
        match fs::remove_file(&self.lock) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(&self.lock, err)),
        }
        Ok(self.output)
    }

    /// Records a scratch folder end to end and checks the output parses.
    pub fn run_sanity_check() -> Result<(), DaemonError> {
        let scratch = std::env::temp_dir().join(format!(
            "codetrack-selftest-{}-{}",
            std::process::id(),
            chrono::Local::now().timestamp_millis()
        ));
        let source = scratch.join("src");
        fs::create_dir_all(&source).map_err(|e| io_err(&source, e))?;
        let result = sanity_check_in(&scratch, &source);
        if let Err(err) = fs::remove_dir_all(&scratch) {
            tracing::debug!(path = %scratch.display(), error = %err, "failed to clean self-test folder");
        }
        result
    }
}

fn sanity_check_in(scratch: &Path, source: &Path) -> Result<(), DaemonError> {
    let sample = source.join("main.txt");
    fs::write(&sample, "hello").map_err(|e| io_err(&sample, e))?;
    let output = scratch.join("selftest.srcs");

    let mut recorder = SourceCodeRecorder::open(source, &output, KEY_SNAPSHOT_SPACING)?;
    recorder.snapshot(None)?;
    fs::write(&sample, "hello, world").map_err(|e| io_err(&sample, e))?;
    recorder.snapshot(Some("self-test"))?;
    let output = recorder.close()?;

    let records = read_recording(&output)?;
    let valid = records.len() == 2
        && records[0].kind == SnapshotKind::Key
        && records[1].tag.as_deref() == Some("self-test")
        && records[1].files.len() == 1;
    if !valid {
        return Err(DaemonError::Protocol(
            "source code recording produced unexpected output".to_string(),
        ));
    }
    Ok(())
}

/// Reads every snapshot from a recording file.
pub fn read_recording(path: &Path) -> Result<Vec<SnapshotRecord>, DaemonError> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| io_err(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

fn embeddable(bytes: Vec<u8>) -> Option<String> {
    if bytes.len() as u64 > MAX_EMBEDDED_BYTES {
        return None;
    }
    String::from_utf8(bytes).ok()
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect();
    Some(parts.join("/"))
}

fn collect_files(root: &Path) -> Result<Vec<PathBuf>, DaemonError> {
    let mut files = Vec::new();
    let mut queue = VecDeque::from([root.to_path_buf()]);

    while let Some(dir) = queue.pop_front() {
        let entries = fs::read_dir(&dir).map_err(|e| io_err(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
            if file_type.is_dir() {
                let skipped = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name));
                if !skipped {
                    queue.push_back(path);
                }
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

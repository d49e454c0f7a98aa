use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::error::DaemonError;
use crate::recorder::{RecorderOptions, SourceCodeRecorder, SnapshotSummary};
use crate::worker::{ExternalEventListener, Lifecycle, MonitoredSubject, Stoppable, Worker};

#[derive(Debug, Default)]
struct RecordingMetrics {
    recording: AtomicBool,
    total_snapshots: AtomicU64,
    last_snapshot_ms: AtomicU64,
    errors: Mutex<Vec<String>>,
}

impl RecordingMetrics {
    fn record(&self, summary: &SnapshotSummary) {
        self.total_snapshots.fetch_add(1, Ordering::SeqCst);
        self.last_snapshot_ms
            .store(summary.elapsed.as_millis() as u64, Ordering::SeqCst);
    }

    fn fail(&self, err: &DaemonError) {
        tracing::error!(
            error = %err,
            "Source code recorder encountered an error. Recording has been stopped."
        );
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(format!("source code recording failed: {err}"));
        }
    }
}

/// Periodically snapshots a source folder into a `.srcs` recording.
pub struct SourceCodeRecordingWorker {
    source_dir: PathBuf,
    output: PathBuf,
    options: RecorderOptions,
    lifecycle: Arc<Lifecycle>,
    metrics: Arc<RecordingMetrics>,
    tags: mpsc::UnboundedSender<String>,
    pending_tags: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl SourceCodeRecordingWorker {
    pub fn new(source_dir: &Path, output: &Path, options: RecorderOptions) -> Self {
        let (tags, pending) = mpsc::unbounded_channel();
        Self {
            source_dir: source_dir.to_path_buf(),
            output: output.to_path_buf(),
            options,
            lifecycle: Arc::new(Lifecycle::new()),
            metrics: Arc::new(RecordingMetrics::default()),
            tags,
            pending_tags: Mutex::new(Some(pending)),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn total_snapshots(&self) -> u64 {
        self.metrics.total_snapshots.load(Ordering::SeqCst)
    }
}

impl Worker for SourceCodeRecordingWorker {
    fn start(&self) {
        let Some(tags) = self.pending_tags.lock().ok().and_then(|mut slot| slot.take()) else {
            return;
        };
        if !self.lifecycle.mark_running() {
            return;
        }
        let session = RecordingSession {
            source_dir: self.source_dir.clone(),
            output: self.output.clone(),
            options: self.options,
            metrics: self.metrics.clone(),
        };
        let stop = self.lifecycle.stop_token();
        let guard = self.lifecycle.stopped_on_drop();
        tokio::spawn(
            async move {
                let _guard = guard;
                session.run(stop, tags).await;
            }
            .instrument(tracing::info_span!(parent: None, "sourcerec")),
        );
    }
}

struct RecordingSession {
    source_dir: PathBuf,
    output: PathBuf,
    options: RecorderOptions,
    metrics: Arc<RecordingMetrics>,
}

impl RecordingSession {
    async fn run(
        self,
        stop: tokio_util::sync::CancellationToken,
        tags: mpsc::UnboundedReceiver<String>,
    ) {
        let source_dir = self.source_dir.clone();
        let output = self.output.clone();
        let key_spacing = self.options.key_snapshot_spacing;
        let opened = tokio::task::spawn_blocking(move || {
            SourceCodeRecorder::open(&source_dir, &output, key_spacing)
        })
        .await
        .map_err(|err| DaemonError::Protocol(format!("recorder open join error: {err}")))
        .and_then(|result| result);
        let recorder = match opened {
            Ok(recorder) => recorder,
            Err(err) => {
                self.metrics.fail(&err);
                return;
            }
        };
        tracing::info!(output = %self.output.display(), "source code recording started");
        self.metrics.recording.store(true, Ordering::SeqCst);
        self.record_until_stopped(recorder, stop, tags).await;
        self.metrics.recording.store(false, Ordering::SeqCst);
    }

    async fn record_until_stopped(
        &self,
        mut recorder: SourceCodeRecorder,
        stop: tokio_util::sync::CancellationToken,
        mut tags: mpsc::UnboundedReceiver<String>,
    ) {
        let deadline = tokio::time::sleep(self.options.max_duration);
        tokio::pin!(deadline);
        let mut interval = tokio::time::interval(self.options.snapshot_every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let tag = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = &mut deadline => {
                    tracing::info!("maximum recording duration reached");
                    break;
                }
                Some(tag) = tags.recv() => Some(tag),
                _ = interval.tick() => None,
            };
            let Some(next) = self.snapshot(recorder, tag).await else {
                return;
            };
            recorder = next;
        }

        // Tags that raced with the stop request still land in the recording.
        tags.close();
        while let Ok(tag) = tags.try_recv() {
            let Some(next) = self.snapshot(recorder, Some(tag)).await else {
                return;
            };
            recorder = next;
        }
        let Some(recorder) = self.snapshot(recorder, None).await else {
            return;
        };
        let closed = tokio::task::spawn_blocking(move || recorder.close())
            .await
            .map_err(|err| DaemonError::Protocol(format!("recorder close join error: {err}")))
            .and_then(|result| result);
        match closed {
            Ok(path) => tracing::info!(output = %path.display(), "source code recording closed"),
            Err(err) => self.metrics.fail(&err),
        }
    }

    /// Returns the recorder back, or `None` after a fatal error.
    async fn snapshot(
        &self,
        mut recorder: SourceCodeRecorder,
        tag: Option<String>,
    ) -> Option<SourceCodeRecorder> {
        let result = tokio::task::spawn_blocking(move || {
            let summary = recorder.snapshot(tag.as_deref());
            (recorder, summary)
        })
        .await;
        match result {
            Ok((recorder, Ok(summary))) => {
                tracing::debug!(
                    index = summary.index,
                    kind = ?summary.kind,
                    files = summary.files,
                    "snapshot captured"
                );
                self.metrics.record(&summary);
                Some(recorder)
            }
            Ok((_, Err(err))) => {
                self.metrics.fail(&err);
                None
            }
            Err(err) => {
                self.metrics
                    .fail(&DaemonError::Protocol(format!("snapshot join error: {err}")));
                None
            }
        }
    }
}

#[async_trait]
impl Stoppable for SourceCodeRecordingWorker {
    fn name(&self) -> &str {
        "sourcerec"
    }

    fn is_alive(&self) -> bool {
        self.lifecycle.is_alive()
    }

    async fn join(&self) {
        self.lifecycle.join().await;
    }

    fn signal_stop(&self) {
        self.lifecycle.request_stop();
    }
}

impl MonitoredSubject for SourceCodeRecordingWorker {
    fn is_active(&self) -> bool {
        self.metrics.recording.load(Ordering::SeqCst)
    }

    fn display_errors(&self, errors: &mut Vec<String>) {
        if let Ok(recorded) = self.metrics.errors.lock() {
            errors.extend(recorded.iter().cloned());
        }
    }

    fn display_metrics(&self, buffer: &mut String) {
        let total = self.total_snapshots();
        let _ = write!(
            buffer,
            "{total:2} source capture{}, {:3} ms/capture",
            if total > 1 { "s" } else { "" },
            self.metrics.last_snapshot_ms.load(Ordering::SeqCst),
        );
    }
}

impl ExternalEventListener for SourceCodeRecordingWorker {
    fn on_external_event(&self, payload: &str) -> Result<(), DaemonError> {
        self.tags
            .send(payload.to_string())
            .map_err(|_| DaemonError::ChannelClosed("source code recording has ended"))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::paths::lock_marker_path;
    use crate::recorder::read_recording;

    fn options() -> RecorderOptions {
        RecorderOptions {
            snapshot_every: Duration::from_secs(3600),
            key_snapshot_spacing: 10,
            max_duration: Duration::from_secs(3600),
        }
    }

    fn project() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("src");
        fs::create_dir_all(&source).expect("source");
        fs::write(source.join("main.rs"), "fn main() {}").expect("write");
        let output = dir.path().join("sourcecode_test.srcs");
        (dir, source, output)
    }

    async fn wait_for_snapshots(worker: &SourceCodeRecordingWorker, count: u64) {
        for _ in 0..200 {
            if worker.total_snapshots() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} snapshots, saw {}", worker.total_snapshots());
    }

    #[tokio::test]
    async fn records_initial_tagged_and_final_snapshots() {
        let (_dir, source, output) = project();
        let worker = SourceCodeRecordingWorker::new(&source, &output, options());
        worker.start();
        wait_for_snapshots(&worker, 1).await;
        assert!(worker.is_active());
        assert!(lock_marker_path(&output).exists());

        worker.on_external_event("TAG1").expect("tag");
        worker.on_external_event("TAG2").expect("tag");
        wait_for_snapshots(&worker, 3).await;

        worker.signal_stop();
        worker.join().await;
        assert!(!worker.is_alive());
        assert!(!worker.is_active());
        assert!(!lock_marker_path(&output).exists());

        let records = read_recording(&output).expect("read");
        let tags: Vec<_> = records.iter().filter_map(|r| r.tag.as_deref()).collect();
        assert_eq!(tags, vec!["TAG1", "TAG2"]);
        assert_eq!(records.len(), 4, "initial, two tagged, final");

        let mut line = String::new();
        worker.display_metrics(&mut line);
        assert!(line.starts_with(" 4 source captures, "), "{line}");
    }

    #[tokio::test]
    async fn missing_source_folder_is_a_fatal_error() {
        let dir = TempDir::new().expect("tempdir");
        let worker = SourceCodeRecordingWorker::new(
            &dir.path().join("missing"),
            &dir.path().join("out.srcs"),
            options(),
        );
        worker.start();
        worker.join().await;
        assert!(!worker.is_alive());

        let mut errors = Vec::new();
        worker.display_errors(&mut errors);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("source code recording failed"));
    }

    #[tokio::test]
    async fn events_after_the_worker_ended_are_rejected() {
        let (_dir, source, output) = project();
        let worker = SourceCodeRecordingWorker::new(&source, &output, options());
        worker.start();
        worker.signal_stop();
        worker.join().await;
        assert!(matches!(
            worker.on_external_event("late"),
            Err(DaemonError::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn self_terminates_after_max_duration() {
        let (_dir, source, output) = project();
        let worker = SourceCodeRecordingWorker::new(
            &source,
            &output,
            RecorderOptions {
                max_duration: Duration::from_millis(100),
                ..options()
            },
        );
        worker.start();
        tokio::time::timeout(Duration::from_secs(5), worker.join())
            .await
            .expect("worker ended on its own");
        assert!(read_recording(&output).expect("read").len() >= 2);
    }
}

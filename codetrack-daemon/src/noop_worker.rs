use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::Instrument;

use codetrack_core::WorkerState;

use crate::error::DaemonError;
use crate::worker::{ExternalEventListener, Lifecycle, MonitoredSubject, Stoppable, Worker};

/// Formats the metrics fragment from `(frame, last_event)`.
pub type MessageProvider = Box<dyn Fn(u64, &str) -> String + Send + Sync>;

/// Placeholder worker used when a producer is disabled. Stays alive until
/// stopped (or until `max_duration` elapses) and reports a frame counter.
pub struct NoOpWorker {
    name: String,
    lifecycle: Arc<Lifecycle>,
    frame: AtomicU64,
    last_event: Mutex<String>,
    message: MessageProvider,
    max_duration: Duration,
}

impl NoOpWorker {
    pub fn new(name: impl Into<String>, max_duration: Duration, message: MessageProvider) -> Self {
        Self {
            name: name.into(),
            lifecycle: Arc::new(Lifecycle::new()),
            frame: AtomicU64::new(0),
            last_event: Mutex::new(String::new()),
            message,
            max_duration,
        }
    }

    /// Stand-in for the source code recorder when `--sourcecode none`.
    pub fn source_code_disabled(max_duration: Duration) -> Self {
        Self::new(
            "sourcerec",
            max_duration,
            Box::new(|frame: u64, event: &str| {
                format!("frame no. {frame:2}, source code recording disabled ({event})")
            }),
        )
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    fn last_event(&self) -> String {
        self.last_event
            .lock()
            .map(|event| event.clone())
            .unwrap_or_default()
    }
}

impl Worker for NoOpWorker {
    fn start(&self) {
        if !self.lifecycle.mark_running() {
            return;
        }
        let stop = self.lifecycle.stop_token();
        let guard = self.lifecycle.stopped_on_drop();
        let max_duration = self.max_duration;
        tokio::spawn(
            async move {
                let _guard = guard;
                tokio::select! {
                    _ = stop.cancelled() => {}
                    _ = tokio::time::sleep(max_duration) => {
                        tracing::info!("maximum duration reached");
                    }
                }
            }
            .instrument(tracing::info_span!(parent: None, "noop")),
        );
    }
}

#[async_trait]
impl Stoppable for NoOpWorker {
    fn name(&self) -> &str {
        &self.name
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

impl MonitoredSubject for NoOpWorker {
    fn is_active(&self) -> bool {
        self.lifecycle.state() == WorkerState::Running
    }

    fn display_errors(&self, _errors: &mut Vec<String>) {}

    fn display_metrics(&self, buffer: &mut String) {
        let frame = self.frame.fetch_add(1, Ordering::SeqCst) + 1;
        buffer.push_str(&(self.message)(frame, &self.last_event()));
    }
}

impl ExternalEventListener for NoOpWorker {
    fn on_external_event(&self, payload: &str) -> Result<(), DaemonError> {
        tracing::info!(event = payload, "external event received");
        let mut last = self
            .last_event
            .lock()
            .map_err(|_| DaemonError::ChannelClosed("noop event slot poisoned"))?;
        *last = payload.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_until_stopped() {
        let worker = NoOpWorker::source_code_disabled(Duration::from_secs(60));
        assert!(!worker.is_alive());
        worker.start();
        assert!(worker.is_alive());
        assert!(worker.is_active());

        worker.signal_stop();
        worker.join().await;
        assert!(!worker.is_alive());
        assert!(!worker.is_active());
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn ends_on_its_own_after_max_duration() {
        let worker = NoOpWorker::source_code_disabled(Duration::from_secs(5));
        worker.start();
        tokio::time::sleep(Duration::from_secs(6)).await;
        worker.join().await;
        assert!(!worker.is_alive());
    }

    #[test]
    fn stop_before_start_is_harmless() {
        let worker = NoOpWorker::source_code_disabled(Duration::from_secs(5));
        worker.signal_stop();
        worker.signal_stop();
        assert_eq!(worker.state(), WorkerState::Created);
    }

    #[tokio::test]
    async fn stop_requested_before_start_ends_right_after_start() {
        let worker = NoOpWorker::source_code_disabled(Duration::from_secs(3600));
        worker.signal_stop();
        worker.start();
        tokio::time::timeout(Duration::from_secs(5), worker.join())
            .await
            .expect("worker ended");
        assert!(!worker.is_alive());
        tokio::task::yield_now().await;
        assert!(!worker.is_alive());
    }

    #[test]
    fn metrics_show_frame_and_last_event() {
        let worker = NoOpWorker::source_code_disabled(Duration::from_secs(5));
        let mut first = String::new();
        worker.display_metrics(&mut first);
        assert_eq!(first, "frame no.  1, source code recording disabled ()");

        worker.on_external_event("TAG1").expect("event");
        let mut second = String::new();
        worker.display_metrics(&mut second);
        assert_eq!(second, "frame no.  2, source code recording disabled (TAG1)");
    }
}

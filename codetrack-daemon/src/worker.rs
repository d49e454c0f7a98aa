//! Capability traits implemented by background workers, plus the shared
//! [`Lifecycle`] state machine that keeps `is_alive` and `join` consistent.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use codetrack_core::WorkerState;

use crate::error::DaemonError;

/// Something the supervisor can stop and wait for.
#[async_trait]
pub trait Stoppable: Send + Sync {
    fn name(&self) -> &str;

    fn is_alive(&self) -> bool;

    /// Resolves once the activity has fully ended, including in-flight I/O.
    async fn join(&self);

    /// Requests cooperative termination. Never blocks, idempotent, safe
    /// before `start` and after the worker has ended.
    fn signal_stop(&self);
}

/// Something the metrics reporter polls.
pub trait MonitoredSubject: Send + Sync {
    /// True while doing productive work, independent of liveness.
    fn is_active(&self) -> bool;

    /// Appends accumulated errors. Must not mutate the subject.
    fn display_errors(&self, errors: &mut Vec<String>);

    /// Appends a one-line human-readable summary.
    fn display_metrics(&self, buffer: &mut String);
}

/// Receives tags pushed through `POST /notify`.
pub trait ExternalEventListener: Send + Sync {
    /// Records `payload` into the worker's own timeline. Safe to call
    /// concurrently with the worker's main activity.
    fn on_external_event(&self, payload: &str) -> Result<(), DaemonError>;
}

/// A background producer owned by the supervisor.
pub trait Worker: Stoppable + MonitoredSubject + ExternalEventListener {
    /// Spawns the background activity on the current tokio runtime.
    fn start(&self);
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Forward-only `Created → Running → StopRequested → Stopped` state plus the
/// stop token handed to the worker's task.
#[derive(Debug)]
pub struct Lifecycle {
    state: watch::Sender<WorkerState>,
    stop: CancellationToken,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(WorkerState::Created);
        Self {
            state,
            stop: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    /// Token cancelled by [`Lifecycle::request_stop`].
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// `Created → Running`. Returns false if the worker was already started.
    pub fn mark_running(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == WorkerState::Created {
                *state = WorkerState::Running;
                true
            } else {
                false
            }
        })
    }

    pub fn request_stop(&self) {
        self.stop.cancel();
        self.state.send_if_modified(|state| {
            if *state == WorkerState::Running {
                *state = WorkerState::StopRequested;
                true
            } else {
                false
            }
        });
    }

    pub fn mark_stopped(&self) {
        self.state.send_if_modified(|state| {
            if *state == WorkerState::Stopped {
                false
            } else {
                *state = WorkerState::Stopped;
                true
            }
        });
    }

    pub async fn join(&self) {
        let mut rx = self.state.subscribe();
        while *rx.borrow_and_update() != WorkerState::Stopped {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Guard that marks the lifecycle stopped when dropped, including when
    /// the owning task panics.
    pub fn stopped_on_drop(self: &Arc<Self>) -> StoppedOnDrop {
        StoppedOnDrop(self.clone())
    }
}

pub struct StoppedOnDrop(Arc<Lifecycle>);

impl Drop for StoppedOnDrop {
    fn drop(&mut self) {
        self.0.mark_stopped();
    }
}

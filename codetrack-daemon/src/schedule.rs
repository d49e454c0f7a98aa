//! Fixed-rate repeating actions with cooperative cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// Handle to a repeating action started with [`schedule_every`].
#[derive(Debug)]
pub struct ScheduleHandle {
    name: &'static str,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    detached: TaskTracker,
}

impl ScheduleHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stops future invocations. An invocation already in progress runs to
    /// completion. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that cancels this schedule, for callers that cannot own the handle.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels and waits for the in-flight invocations, if any.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            tracing::warn!(schedule = self.name, error = %err, "scheduled task ended abnormally");
        }
        self.detached.close();
        self.detached.wait().await;
    }
}

/// Runs `action` immediately and then every `every` until cancelled.
///
/// Ticks that fall due while an invocation is still running are skipped, so
/// invocations never overlap. The task runs inside a span named `span`.
pub fn schedule_every<F, Fut>(
    name: &'static str,
    span: tracing::Span,
    every: Duration,
    mut action: F,
) -> ScheduleHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let task = tokio::spawn(
        async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        action().await;
                    }
                }
            }
        }
        .instrument(span),
    );

    ScheduleHandle {
        name,
        cancel,
        task,
        detached: TaskTracker::new(),
    }
}

/// Like [`schedule_every`], but each invocation runs as its own task, so
/// every tick fires on time even while an earlier invocation is running.
/// The action decides what to do about overlap.
///
/// The action receives the schedule's cancellation token. Invocations
/// already spawned keep running after cancel, and
/// [`ScheduleHandle::shutdown`] waits for them.
pub fn schedule_every_detached<F, Fut>(
    name: &'static str,
    span: tracing::Span,
    every: Duration,
    mut action: F,
) -> ScheduleHandle
where
    F: FnMut(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let detached = TaskTracker::new();
    let tracker = detached.clone();
    let invocation_span = span.clone();
    let task = tokio::spawn(
        async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        tracker.spawn(action(token.clone()).instrument(invocation_span.clone()));
                    }
                }
            }
        }
        .instrument(span),
    );

    ScheduleHandle {
        name,
        cancel,
        task,
        detached,
    }
}

//! Liveness watchdog: the first time any worker is found dead, every worker
//! is asked to stop so the supervisor can drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::schedule::{schedule_every, ScheduleHandle};
use crate::worker::Stoppable;

pub struct HealthMonitor {
    workers: Vec<Arc<dyn Stoppable>>,
    tripped: AtomicBool,
}

impl HealthMonitor {
    pub fn new(workers: Vec<Arc<dyn Stoppable>>) -> Self {
        Self {
            workers,
            tripped: AtomicBool::new(false),
        }
    }

    /// Returns true if this check found a dead worker and requested a stop.
    pub fn check_once(&self) -> bool {
        let dead: Vec<&str> = self
            .workers
            .iter()
            .filter(|worker| !worker.is_alive())
            .map(|worker| worker.name())
            .collect();
        if dead.is_empty() || self.tripped.swap(true, Ordering::SeqCst) {
            return false;
        }

        tracing::warn!(workers = ?dead, "worker no longer alive, stopping all workers");
        for worker in &self.workers {
            worker.signal_stop();
        }
        true
    }

    pub fn has_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    pub fn schedule_every(self: &Arc<Self>, every: Duration) -> ScheduleHandle {
        let monitor = self.clone();
        schedule_every(
            "health",
            tracing::info_span!(parent: None, "health"),
            every,
            move || {
                let monitor = monitor.clone();
                async move {
                    monitor.check_once();
                }
            },
        )
    }
}

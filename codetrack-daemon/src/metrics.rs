//! Periodic one-line status report over every registered subject.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::schedule::{schedule_every, ScheduleHandle};
use crate::worker::MonitoredSubject;

pub struct MetricsAggregator {
    subjects: Vec<Arc<dyn MonitoredSubject>>,
    tick: AtomicU64,
}

impl MetricsAggregator {
    pub fn new(subjects: Vec<Arc<dyn MonitoredSubject>>) -> Self {
        Self {
            subjects,
            tick: AtomicU64::new(0),
        }
    }

    /// Logs accumulated errors from every subject, then builds and logs the
    /// metrics line. Returns the line.
    pub fn report_once(&self) -> String {
        let mut errors = Vec::new();
        for subject in &self.subjects {
            subject.display_errors(&mut errors);
        }
        for message in &errors {
            tracing::error!("{message}");
        }

        let tick = self.tick.fetch_add(1, Ordering::SeqCst);
        let mut line = String::new();
        let _ = write!(line, "tick {tick:4}");
        for subject in self.subjects.iter().filter(|s| s.is_active()) {
            line.push_str(" | ");
            subject.display_metrics(&mut line);
        }
        tracing::info!("{line}");
        line
    }

    pub fn schedule_every(self: &Arc<Self>, every: Duration) -> ScheduleHandle {
        let aggregator = self.clone();
        schedule_every(
            "metrics",
            tracing::info_span!(parent: None, "metrics"),
            every,
            move || {
                let aggregator = aggregator.clone();
                async move {
                    aggregator.report_once();
                }
            },
        )
    }
}

//! Supervision and control layer for the code tracker: background workers,
//! recurring sync/health/metrics schedules, the HTTP control plane and the
//! ordered shutdown that guarantees a final upload.

pub mod control;
mod error;
pub mod file_logging;
pub mod health;
pub mod metrics;
pub mod noop_worker;
pub mod paths;
pub mod preflight;
pub mod protocol;
pub mod recorder;
mod runtime;
pub mod schedule;
pub mod sourcecode;
pub mod supervisor;
pub mod sync_task;
pub mod upload_status;
pub mod worker;

pub use control::ControlServer;
pub use error::DaemonError;
pub use file_logging::{LocalFileLogging, LogRotation};
pub use health::HealthMonitor;
pub use metrics::MetricsAggregator;
pub use noop_worker::NoOpWorker;
pub use protocol::ControlClient;
pub use recorder::{RecorderOptions, SourceCodeRecorder};
pub use runtime::{
    self_test, start_blocking, track_and_upload, SelfTestOptions, TrackOptions, TrackOutcome,
};
pub use schedule::{schedule_every, schedule_every_detached, ScheduleHandle};
pub use sourcecode::SourceCodeRecordingWorker;
pub use supervisor::{Supervisor, SupervisorPhase, SupervisorSettings};
pub use sync_task::{BackgroundRemoteSync, SyncAttempt};
pub use worker::{ExternalEventListener, Lifecycle, MonitoredSubject, Stoppable, Worker};

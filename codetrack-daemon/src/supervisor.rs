//! Composes workers, schedules and the control server, and walks the
//! `Initializing → Running → Draining → Finalizing → Stopped` shutdown path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use codetrack_sync::{SyncJob, UploadStatsListener};

use crate::control::ControlServer;
use crate::error::DaemonError;
use crate::file_logging::LogRotation;
use crate::health::HealthMonitor;
use crate::metrics::MetricsAggregator;
use crate::paths::{default_listen_addr, HEALTH_CHECK_EVERY, METRICS_EVERY, SYNC_EVERY};
use crate::sync_task::BackgroundRemoteSync;
use crate::upload_status::UploadStatsStatus;
use crate::worker::{ExternalEventListener, MonitoredSubject, Stoppable, Worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SupervisorPhase {
    Initializing,
    Running,
    Draining,
    Finalizing,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub listen_addr: SocketAddr,
    pub sync_every: Duration,
    pub health_every: Duration,
    pub metrics_every: Duration,
    /// Treat Ctrl-C / SIGTERM like an external stop request.
    pub handle_os_signals: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            sync_every: SYNC_EVERY,
            health_every: HEALTH_CHECK_EVERY,
            metrics_every: METRICS_EVERY,
            handle_os_signals: true,
        }
    }
}

pub struct Supervisor {
    settings: SupervisorSettings,
    workers: Vec<Arc<dyn Worker>>,
    sync: BackgroundRemoteSync,
    upload_stats: Arc<UploadStatsListener>,
    rotation: Arc<dyn LogRotation>,
    phase: watch::Sender<SupervisorPhase>,
    termination: CancellationToken,
}

impl Supervisor {
    pub fn new(
        settings: SupervisorSettings,
        sync_job: Arc<dyn SyncJob>,
        upload_stats: Arc<UploadStatsListener>,
        rotation: Arc<dyn LogRotation>,
    ) -> Self {
        let (phase, _) = watch::channel(SupervisorPhase::Initializing);
        Self {
            settings,
            workers: Vec::new(),
            sync: BackgroundRemoteSync::new(sync_job),
            upload_stats,
            rotation,
            phase,
            termination: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn add_worker(&mut self, worker: Arc<dyn Worker>) {
        self.workers.push(worker);
    }

    /// Cancelling this token behaves like a process-termination signal.
    pub fn termination_token(&self) -> CancellationToken {
        self.termination.clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SupervisorPhase> {
        self.phase.subscribe()
    }

    pub async fn run(self, server: ControlServer) -> Result<(), DaemonError> {
        self.run_phases(server)
            .instrument(tracing::info_span!(parent: None, "main"))
            .await
    }

    fn enter(&self, next: SupervisorPhase) {
        self.phase.send_if_modified(|phase| {
            if next > *phase {
                *phase = next;
                true
            } else {
                false
            }
        });
        tracing::debug!(phase = ?next, "supervisor phase");
    }

    async fn run_phases(self, mut server: ControlServer) -> Result<(), DaemonError> {
        if server.is_started() {
            return Err(DaemonError::Protocol(
                "control server was started before the supervisor registered its listeners"
                    .to_string(),
            ));
        }
        let stoppables: Vec<Arc<dyn Stoppable>> = self
            .workers
            .iter()
            .map(|worker| worker.clone() as Arc<dyn Stoppable>)
            .collect();
        let mut subjects: Vec<Arc<dyn MonitoredSubject>> = Vec::new();

        for worker in &self.workers {
            server.add_notify_listener(worker.clone() as Arc<dyn ExternalEventListener>)?;
            let target = worker.clone();
            server.add_stop_listener(move |_| {
                target.signal_stop();
                Ok(())
            })?;
        }
        for worker in &self.workers {
            worker.start();
            subjects.push(worker.clone());
        }

        let sync_schedule = self.sync.schedule_every(self.settings.sync_every);
        subjects.push(Arc::new(UploadStatsStatus::new(self.upload_stats.clone())));

        let metrics = Arc::new(MetricsAggregator::new(subjects));
        let metrics_schedule = metrics.schedule_every(self.settings.metrics_every);

        let health = Arc::new(HealthMonitor::new(stoppables.clone()));
        let health_schedule = health.schedule_every(self.settings.health_every);
        let cancel_health = health_schedule.cancel_token();
        server.add_stop_listener(move |_| {
            cancel_health.cancel();
            Ok(())
        })?;

        if let Err(err) = server.start() {
            sync_schedule.shutdown().await;
            metrics_schedule.shutdown().await;
            health_schedule.shutdown().await;
            for worker in &stoppables {
                worker.signal_stop();
            }
            for worker in &stoppables {
                worker.join().await;
            }
            self.enter(SupervisorPhase::Stopped);
            return Err(err);
        }

        let finished = CancellationToken::new();
        let hook = tokio::spawn(
            termination_hook(
                self.termination.clone(),
                finished.clone(),
                stoppables.clone(),
                health_schedule.cancel_token(),
                self.settings.handle_os_signals,
            )
            .in_current_span(),
        );

        self.enter(SupervisorPhase::Running);
        for worker in &stoppables {
            worker.join().await;
            tracing::debug!(worker = worker.name(), "worker joined");
        }

        self.enter(SupervisorPhase::Draining);
        health_schedule.cancel();
        server.signal_stop();

        self.enter(SupervisorPhase::Finalizing);
        if let Err(err) = self.rotation.force_rotation() {
            tracing::warn!(error = %err, "log rotation before final upload failed");
        }
        sync_schedule.cancel();
        self.sync.final_run().await;
        sync_schedule.shutdown().await;
        metrics_schedule.shutdown().await;
        health_schedule.shutdown().await;

        if let Err(err) = server.shutdown().await {
            tracing::error!(error = %err, "control server did not shut down cleanly");
        }
        self.enter(SupervisorPhase::Stopped);
        tracing::warn!("~~~~~~ Stopped ~~~~~~");

        finished.cancel();
        if let Err(err) = hook.await {
            tracing::warn!(error = %err, "termination hook ended abnormally");
        }
        Ok(())
    }
}

/// Waits for an external termination request, pushes it through the normal
/// stop path, then holds until the orchestration flow has finished.
async fn termination_hook(
    termination: CancellationToken,
    finished: CancellationToken,
    workers: Vec<Arc<dyn Stoppable>>,
    cancel_health: CancellationToken,
    handle_os_signals: bool,
) {
    tokio::select! {
        _ = finished.cancelled() => return,
        _ = termination.cancelled() => {}
        _ = os_termination_signal(), if handle_os_signals => {}
    }

    tracing::warn!("Shutdown signal received - please wait for the upload to complete");
    for worker in &workers {
        worker.signal_stop();
    }
    cancel_health.cancel();
    finished.cancelled().await;
}

async fn os_termination_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use codetrack_core::{enabled_path, file_timestamp, RemoteConfig};
use codetrack_sync::{
    DirectoryDestination, Filters, NoOpDestination, RemoteDestination, RemoteSync, SyncError,
    UploadStatsListener,
};
use tracing::Instrument;

use crate::control::ControlServer;
use crate::error::{io_err, DaemonError};
use crate::file_logging::{init_stderr_tracing, init_tracing, LocalFileLogging};
use crate::noop_worker::NoOpWorker;
use crate::paths::recording_file_path;
use crate::preflight::{create_missing_parent_directories, has_enough_free_diskspace, remove_old_locks};
use crate::recorder::{RecorderOptions, SourceCodeRecorder};
use crate::sourcecode::SourceCodeRecordingWorker;
use crate::supervisor::{Supervisor, SupervisorSettings};
use crate::worker::Worker;

#[derive(Debug, Clone)]
pub struct TrackOptions {
    pub store: PathBuf,
    /// Remote destination YAML, or `none`.
    pub config: String,
    /// Folder to record, or `none`.
    pub sourcecode: String,
    pub minimum_diskspace_gb: u64,
    pub debug: bool,
    pub supervisor: SupervisorSettings,
    pub recorder: RecorderOptions,
}

impl TrackOptions {
    pub fn new(store: impl Into<PathBuf>, config: &str, sourcecode: &str) -> Self {
        Self {
            store: store.into(),
            config: config.to_string(),
            sourcecode: sourcecode.to_string(),
            minimum_diskspace_gb: 1,
            debug: false,
            supervisor: SupervisorSettings::default(),
            recorder: RecorderOptions::default(),
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.supervisor.listen_addr
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Completed,
    InsufficientDiskSpace,
    /// The destination refused the upload session; nothing was started.
    DestinationRejected,
}

/// Runs the tracker on a fresh multi-thread runtime until it has stopped.
pub fn start_blocking(options: TrackOptions) -> Result<TrackOutcome, DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(track_and_upload(options))
}

pub async fn track_and_upload(options: TrackOptions) -> Result<TrackOutcome, DaemonError> {
    let timestamp = file_timestamp(chrono::Local::now());
    let logging = Arc::new(LocalFileLogging::new(&options.store, timestamp.as_str()));
    init_tracing(options.debug, &logging);

    let result = run_tracker(&options, &logging, &timestamp)
        .instrument(tracing::info_span!(parent: None, "main"))
        .await;
    if let Err(err) = &result {
        tracing::error!(error = %err, "Exception encountered. Stopping now.");
    }
    if let Err(err) = logging.stop() {
        tracing::warn!(error = %err, "failed to close the log file");
    }
    result
}

async fn run_tracker(
    options: &TrackOptions,
    logging: &Arc<LocalFileLogging>,
    timestamp: &str,
) -> Result<TrackOutcome, DaemonError> {
    let working_dir = std::env::current_dir().map_err(|e| io_err(".", e))?;
    if !has_enough_free_diskspace(options.minimum_diskspace_gb, &working_dir)? {
        return Ok(TrackOutcome::InsufficientDiskSpace);
    }

    create_missing_parent_directories(&options.store)?;
    let removed = remove_old_locks(&options.store);
    if removed > 0 {
        tracing::debug!(removed, "removed stale lock markers");
    }
    logging.start()?;

    let destination = build_destination(&options.config)?;
    tracing::info!("Start sync session with {}", destination.describe());
    if let Err(err) = destination.start_session() {
        report_session_error(&err, options.debug);
        return Ok(TrackOutcome::DestinationRejected);
    }

    let worker = build_worker(options, timestamp);
    let upload_stats = Arc::new(UploadStatsListener::new());
    let remote_sync = RemoteSync::new(
        &options.store,
        Filters::default(),
        destination.clone(),
        upload_stats.clone(),
    );

    let server = ControlServer::bind(options.listen_addr()).await?;
    let mut supervisor = Supervisor::new(
        options.supervisor.clone(),
        Arc::new(remote_sync),
        upload_stats,
        logging.clone(),
    );
    supervisor.add_worker(worker);
    supervisor.run(server).await?;

    tracing::info!("Stop sync session");
    if let Err(err) = destination.stop_session() {
        report_session_error(&err, options.debug);
    }
    Ok(TrackOutcome::Completed)
}

fn build_destination(config: &str) -> Result<Arc<dyn RemoteDestination>, DaemonError> {
    match enabled_path(config) {
        None => Ok(Arc::new(NoOpDestination)),
        Some(path) => {
            let config = RemoteConfig::load_at(&path)?;
            Ok(Arc::new(DirectoryDestination::from_config(&config)))
        }
    }
}

fn build_worker(options: &TrackOptions, timestamp: &str) -> Arc<dyn Worker> {
    match enabled_path(&options.sourcecode) {
        None => Arc::new(NoOpWorker::source_code_disabled(
            options.recorder.max_duration,
        )),
        Some(source) => Arc::new(SourceCodeRecordingWorker::new(
            &source,
            &recording_file_path(&options.store, timestamp),
            options.recorder,
        )),
    }
}

fn report_session_error(err: &SyncError, debug: bool) {
    if debug {
        tracing::error!(error = ?err, "User does not have enough permissions to upload.");
    } else {
        tracing::error!("User does not have enough permissions to upload. Reason: {err}");
    }
}

#[derive(Debug, Clone)]
pub struct SelfTestOptions {
    pub minimum_diskspace_gb: u64,
    /// Remote destination YAML to probe, or `none`.
    pub config: String,
    pub debug: bool,
}

/// Disk space, recorder and (optionally) destination checks.
/// Returns `Ok(false)` when the disk space check fails.
pub fn self_test(options: &SelfTestOptions) -> Result<bool, DaemonError> {
    init_stderr_tracing(options.debug);
    tracing::warn!("~~~~~~ Self test starting ~~~~~~");

    let working_dir = std::env::current_dir().map_err(|e| io_err(".", e))?;
    if !has_enough_free_diskspace(options.minimum_diskspace_gb, &working_dir)? {
        return Ok(false);
    }

    SourceCodeRecorder::run_sanity_check()?;
    tracing::info!("Source code recorder sanity check passed");

    probe_destination(&options.config)?;

    tracing::warn!("~~~~~~ Self test completed successfully ~~~~~~");
    Ok(true)
}

fn probe_destination(config: &str) -> Result<(), DaemonError> {
    let destination = build_destination(config)?;
    destination.probe()?;
    tracing::info!("Destination {} is reachable", destination.describe());
    Ok(())
}

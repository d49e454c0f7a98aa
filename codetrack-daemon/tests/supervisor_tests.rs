use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use codetrack_daemon::{
    ControlClient, ControlServer, DaemonError, ExternalEventListener, Lifecycle, LogRotation,
    MonitoredSubject, Stoppable, Supervisor, SupervisorPhase, SupervisorSettings, Worker,
};
use codetrack_sync::{SyncError, SyncJob, SyncReport, UploadStatsListener};

type Journal = Arc<Mutex<Vec<String>>>;

fn record(journal: &Journal, entry: impl Into<String>) {
    journal.lock().expect("journal").push(entry.into());
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().expect("journal").clone()
}

fn position(journal: &[String], entry: &str) -> usize {
    journal
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("missing {entry} in {journal:?}"))
}

struct FakeWorker {
    name: &'static str,
    lifecycle: Arc<Lifecycle>,
    journal: Journal,
    events: Mutex<Vec<String>>,
    crash_after: Option<Duration>,
}

impl FakeWorker {
    fn new(name: &'static str, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name,
            lifecycle: Arc::new(Lifecycle::new()),
            journal: journal.clone(),
            events: Mutex::new(Vec::new()),
            crash_after: None,
        })
    }

    fn crashing(name: &'static str, journal: &Journal, after: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            lifecycle: Arc::new(Lifecycle::new()),
            journal: journal.clone(),
            events: Mutex::new(Vec::new()),
            crash_after: Some(after),
        })
    }
}

impl Worker for FakeWorker {
    fn start(&self) {
        if !self.lifecycle.mark_running() {
            return;
        }
        let stop = self.lifecycle.stop_token();
        let guard = self.lifecycle.stopped_on_drop();
        let journal = self.journal.clone();
        let name = self.name;
        let crash_after = self.crash_after;
        tokio::spawn(async move {
            let _guard = guard;
            match crash_after {
                Some(after) => {
                    tokio::select! {
                        _ = stop.cancelled() => {}
                        _ = tokio::time::sleep(after) => {
                            record(&journal, format!("{name} crashed"));
                            return;
                        }
                    }
                }
                None => stop.cancelled().await,
            }
            record(&journal, format!("{name} stopped"));
        });
    }
}

#[async_trait]
impl Stoppable for FakeWorker {
    fn name(&self) -> &str {
        self.name
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

impl MonitoredSubject for FakeWorker {
    fn is_active(&self) -> bool {
        self.lifecycle.is_alive()
    }

    fn display_errors(&self, _errors: &mut Vec<String>) {}

    fn display_metrics(&self, buffer: &mut String) {
        buffer.push_str(self.name);
    }
}

impl ExternalEventListener for FakeWorker {
    fn on_external_event(&self, payload: &str) -> Result<(), DaemonError> {
        self.events.lock().expect("events").push(payload.to_string());
        Ok(())
    }
}

struct FakeRotation(Journal);

impl LogRotation for FakeRotation {
    fn force_rotation(&self) -> Result<(), DaemonError> {
        record(&self.0, "rotation");
        Ok(())
    }
}

struct FakeSync {
    journal: Journal,
    delay: Duration,
    running: AtomicUsize,
    max_concurrent: AtomicUsize,
    runs: AtomicUsize,
}

impl FakeSync {
    fn new(journal: &Journal, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            journal: journal.clone(),
            delay,
            running: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
        })
    }
}

impl SyncJob for FakeSync {
    fn run_once(&self) -> Result<SyncReport, SyncError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        record(&self.journal, format!("sync {run}"));
        std::thread::sleep(self.delay);
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(SyncReport::default())
    }
}

fn settings() -> SupervisorSettings {
    SupervisorSettings {
        listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        sync_every: Duration::from_secs(3600),
        health_every: Duration::from_millis(50),
        metrics_every: Duration::from_millis(50),
        handle_os_signals: false,
    }
}

struct Harness {
    journal: Journal,
    sync: Arc<FakeSync>,
    client: ControlClient,
    phases: tokio::sync::watch::Receiver<SupervisorPhase>,
    termination: tokio_util::sync::CancellationToken,
    run: tokio::task::JoinHandle<Result<(), DaemonError>>,
}

async fn launch(workers: Vec<Arc<FakeWorker>>, journal: Journal, sync_delay: Duration) -> Harness {
    let sync = FakeSync::new(&journal, sync_delay);
    let server = ControlServer::bind(settings().listen_addr).await.expect("bind");
    let client = ControlClient::new(server.local_addr());
    let mut supervisor = Supervisor::new(
        settings(),
        sync.clone(),
        Arc::new(UploadStatsListener::new()),
        Arc::new(FakeRotation(journal.clone())),
    );
    for worker in workers {
        supervisor.add_worker(worker);
    }
    let phases = supervisor.subscribe_phase();
    let termination = supervisor.termination_token();
    let run = tokio::spawn(supervisor.run(server));

    let probe = client.clone();
    tokio::task::spawn_blocking(move || probe.wait_until_ready(50, Duration::from_millis(20)))
        .await
        .expect("join")
        .expect("control server ready");
    // The sync schedule fires on start; wait for that first run to begin.
    for _ in 0..200 {
        if sync.runs.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    Harness {
        journal,
        sync,
        client,
        phases,
        termination,
        run,
    }
}

async fn blocking<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    tokio::task::spawn_blocking(f).await.expect("join")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn http_stop_drains_then_rotates_then_runs_final_sync_once() {
    let journal = Journal::default();
    let worker = FakeWorker::new("recorder", &journal);
    let harness = launch(vec![worker.clone()], journal, Duration::ZERO).await;

    let client = harness.client.clone();
    blocking(move || client.stop()).await.expect("stop");
    let second = harness.client.clone();
    // The server may already be gone; either way no second finalize happens.
    let _ = blocking(move || second.stop()).await;

    harness.run.await.expect("join").expect("supervisor");
    assert_eq!(*harness.phases.borrow(), SupervisorPhase::Stopped);
    assert!(!worker.is_alive());

    let journal = entries(&harness.journal);
    let stopped = position(&journal, "recorder stopped");
    let rotation = position(&journal, "rotation");
    let final_sync = position(&journal, "sync 2");
    assert!(stopped < rotation && rotation < final_sync, "{journal:?}");
    assert_eq!(harness.sync.runs.load(Ordering::SeqCst), 2);
    assert_eq!(journal.iter().filter(|e| *e == "rotation").count(), 1);

    let client = harness.client.clone();
    assert!(matches!(
        blocking(move || client.status()).await,
        Err(DaemonError::DaemonNotRunning { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn notify_payloads_reach_every_worker_in_order() {
    let journal = Journal::default();
    let first = FakeWorker::new("first", &journal);
    let second = FakeWorker::new("second", &journal);
    let harness = launch(vec![first.clone(), second.clone()], journal, Duration::ZERO).await;

    let client = harness.client.clone();
    blocking(move || {
        for payload in ["A", "B", "C", "D"] {
            client.notify(payload).expect("notify");
        }
        client.stop().expect("stop");
    })
    .await;
    harness.run.await.expect("join").expect("supervisor");

    for worker in [&first, &second] {
        assert_eq!(*worker.events.lock().expect("events"), vec!["A", "B", "C", "D"]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn termination_signal_goes_through_the_same_finalize_path() {
    let journal = Journal::default();
    let worker = FakeWorker::new("recorder", &journal);
    let harness = launch(vec![worker], journal, Duration::ZERO).await;

    harness.termination.cancel();
    harness.run.await.expect("join").expect("supervisor");

    let journal = entries(&harness.journal);
    assert!(position(&journal, "recorder stopped") < position(&journal, "rotation"));
    assert!(position(&journal, "rotation") < position(&journal, "sync 2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crashed_worker_trips_health_and_stops_the_rest() {
    let journal = Journal::default();
    let crashing = FakeWorker::crashing("flaky", &journal, Duration::from_millis(100));
    let healthy = FakeWorker::new("healthy", &journal);
    let harness = launch(vec![crashing, healthy.clone()], journal, Duration::ZERO).await;

    tokio::time::timeout(Duration::from_secs(10), harness.run)
        .await
        .expect("supervisor finished after crash")
        .expect("join")
        .expect("supervisor");

    let journal = entries(&harness.journal);
    assert!(position(&journal, "flaky crashed") < position(&journal, "healthy stopped"));
    assert!(position(&journal, "healthy stopped") < position(&journal, "rotation"));
    assert!(!healthy.is_alive());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn final_sync_waits_for_in_flight_periodic_run() {
    let journal = Journal::default();
    let worker = FakeWorker::new("recorder", &journal);
    let harness = launch(vec![worker], journal, Duration::from_millis(400)).await;

    // The periodic run fired at startup and is still sleeping.
    let client = harness.client.clone();
    blocking(move || client.stop()).await.expect("stop");
    harness.run.await.expect("join").expect("supervisor");

    assert_eq!(harness.sync.runs.load(Ordering::SeqCst), 2);
    assert_eq!(harness.sync.max_concurrent.load(Ordering::SeqCst), 1);
    let journal = entries(&harness.journal);
    assert!(position(&journal, "sync 1") < position(&journal, "rotation"));
    assert!(position(&journal, "rotation") < position(&journal, "sync 2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn phases_only_move_forward() {
    let journal = Journal::default();
    let worker = FakeWorker::new("recorder", &journal);
    let harness = launch(vec![worker], journal, Duration::ZERO).await;

    let mut phases = harness.phases.clone();
    let observer = tokio::spawn(async move {
        let mut seen = vec![*phases.borrow_and_update()];
        while phases.changed().await.is_ok() {
            seen.push(*phases.borrow_and_update());
        }
        seen
    });

    let client = harness.client.clone();
    blocking(move || client.stop()).await.expect("stop");
    harness.run.await.expect("join").expect("supervisor");

    let seen = observer.await.expect("observer");
    assert!(seen[0] <= SupervisorPhase::Running, "{seen:?}");
    assert_eq!(seen.last(), Some(&SupervisorPhase::Stopped));
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]), "{seen:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_stop_while_finalizing_is_accepted_without_a_second_finalize() {
    let journal = Journal::default();
    let worker = FakeWorker::new("recorder", &journal);
    let harness = launch(vec![worker], journal, Duration::from_millis(400)).await;

    let first = harness.client.clone();
    blocking(move || first.stop()).await.expect("stop");
    // The final sync takes at least 400 ms, so the server is still up.
    let second = harness.client.clone();
    blocking(move || second.stop()).await.expect("second stop");

    harness.run.await.expect("join").expect("supervisor");
    let journal = entries(&harness.journal);
    assert_eq!(harness.sync.runs.load(Ordering::SeqCst), 2, "{journal:?}");
    assert_eq!(journal.iter().filter(|e| *e == "rotation").count(), 1);
    assert_eq!(harness.sync.max_concurrent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_started_elsewhere_is_rejected_before_any_worker_starts() {
    let journal = Journal::default();
    let worker = FakeWorker::new("recorder", &journal);
    let mut server = ControlServer::bind(settings().listen_addr).await.expect("bind");
    server.start().expect("start");

    let mut supervisor = Supervisor::new(
        settings(),
        FakeSync::new(&journal, Duration::ZERO),
        Arc::new(UploadStatsListener::new()),
        Arc::new(FakeRotation(journal.clone())),
    );
    supervisor.add_worker(worker.clone());

    let result = supervisor.run(server).await;
    assert!(matches!(result, Err(DaemonError::Protocol(_))), "{result:?}");
    assert!(!worker.is_alive());
    assert!(entries(&journal).is_empty());
}

//! HTTP control plane: `GET /status`, `POST /notify`, `POST /stop`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::DaemonError;
use crate::worker::ExternalEventListener;

pub type StopListener = Box<dyn Fn(&str) -> Result<(), DaemonError> + Send + Sync>;

struct ControlState {
    notify: Vec<Arc<dyn ExternalEventListener>>,
    stop: Vec<StopListener>,
    stop_fired: AtomicBool,
}

impl ControlState {
    fn notify_all(&self, payload: &str) -> bool {
        let mut all_ok = true;
        for listener in &self.notify {
            if let Err(err) = listener.on_external_event(payload) {
                tracing::error!(error = %err, "notify listener failed");
                all_ok = false;
            }
        }
        all_ok
    }

    fn stop_all(&self, payload: &str) {
        self.stop_fired.store(true, Ordering::SeqCst);
        for listener in &self.stop {
            if let Err(err) = listener(payload) {
                tracing::error!(error = %err, "stop listener failed");
            }
        }
    }
}

pub struct ControlServer {
    local_addr: SocketAddr,
    listener: Option<TcpListener>,
    notify: Vec<Arc<dyn ExternalEventListener>>,
    stop: Vec<StopListener>,
    state: Option<Arc<ControlState>>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<Result<(), DaemonError>>>,
}

impl ControlServer {
    /// Binds the listening socket. Port 0 picks a free port.
    pub async fn bind(addr: SocketAddr) -> Result<Self, DaemonError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| DaemonError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| DaemonError::Bind { addr, source })?;
        Ok(Self {
            local_addr,
            listener: Some(listener),
            notify: Vec::new(),
            stop: Vec::new(),
            state: None,
            shutdown: CancellationToken::new(),
            task: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_started(&self) -> bool {
        self.listener.is_none()
    }

    /// Listeners must be registered before [`ControlServer::start`]; the
    /// listener lists are frozen once the server runs.
    pub fn add_notify_listener(
        &mut self,
        listener: Arc<dyn ExternalEventListener>,
    ) -> Result<(), DaemonError> {
        self.ensure_not_started()?;
        self.notify.push(listener);
        Ok(())
    }

    pub fn add_stop_listener<F>(&mut self, listener: F) -> Result<(), DaemonError>
    where
        F: Fn(&str) -> Result<(), DaemonError> + Send + Sync + 'static,
    {
        self.ensure_not_started()?;
        self.stop.push(Box::new(listener));
        Ok(())
    }

    fn ensure_not_started(&self) -> Result<(), DaemonError> {
        if self.is_started() {
            return Err(DaemonError::Protocol(
                "listeners must be registered before the control server starts".to_string(),
            ));
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), DaemonError> {
        let Some(listener) = self.listener.take() else {
            return Err(DaemonError::Protocol(
                "control server already started".to_string(),
            ));
        };
        let state = Arc::new(ControlState {
            notify: std::mem::take(&mut self.notify),
            stop: std::mem::take(&mut self.stop),
            stop_fired: AtomicBool::new(false),
        });
        self.state = Some(state.clone());

        let app = Router::new()
            .route("/status", get(status))
            .route("/notify", post(notify))
            .route("/stop", post(stop))
            .with_state(state);

        let shutdown = self.shutdown.clone();
        let addr = self.local_addr;
        tracing::info!("Control server listening on {addr}");
        self.task = Some(tokio::spawn(
            async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
                    .map_err(|err| DaemonError::Http(format!("control server failed: {err}")))
            }
            .instrument(tracing::info_span!(parent: None, "control")),
        ));
        Ok(())
    }

    /// No further business will happen: fires the stop listeners unless a
    /// `/stop` request already did. The server keeps answering `/status`
    /// until [`ControlServer::shutdown`]. Idempotent.
    pub fn signal_stop(&self) {
        let Some(state) = &self.state else {
            return;
        };
        if !state.stop_fired.swap(true, Ordering::SeqCst) {
            state.stop_all("");
        }
    }

    pub fn stop_received(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.stop_fired.load(Ordering::SeqCst))
    }

    /// Stops accepting connections and waits for the serve task to end.
    pub async fn shutdown(mut self) -> Result<(), DaemonError> {
        self.shutdown.cancel();
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match task.await {
            Ok(inner) => inner,
            Err(err) => Err(DaemonError::Protocol(format!(
                "control server task join failure: {err}"
            ))),
        }
    }
}

async fn status() -> &'static str {
    "OK\n"
}

async fn notify(State(state): State<Arc<ControlState>>, body: String) -> StatusCode {
    let _span = tracing::info_span!(parent: None, "control").entered();
    tracing::debug!(payload = %body, "notify received");
    if state.notify_all(&body) {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

async fn stop(State(state): State<Arc<ControlState>>, body: String) -> StatusCode {
    let _span = tracing::info_span!(parent: None, "control").entered();
    tracing::info!("Stop signal received");
    state.stop_all(&body);
    StatusCode::OK
}

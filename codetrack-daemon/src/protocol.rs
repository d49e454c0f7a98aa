use std::net::SocketAddr;
use std::time::Duration;

use crate::error::DaemonError;

/// Blocking HTTP client for a running tracker's control plane.
#[derive(Debug, Clone)]
pub struct ControlClient {
    base: String,
    agent: ureq::Agent,
}

impl ControlClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self::for_host(&addr.ip().to_string(), addr.port())
    }

    pub fn for_host(host: &str, port: u16) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Self {
            base: format!("http://{host}:{port}"),
            agent,
        }
    }

    /// `GET /status`; returns the body (`"OK\n"` while running).
    pub fn status(&self) -> Result<String, DaemonError> {
        let response = self
            .agent
            .get(&self.url("/status"))
            .call()
            .map_err(|err| self.map_err("/status", err))?;
        response
            .into_string()
            .map_err(|err| DaemonError::Protocol(format!("unreadable status response: {err}")))
    }

    /// `POST /notify` with `payload` as the raw body.
    pub fn notify(&self, payload: &str) -> Result<(), DaemonError> {
        self.agent
            .post(&self.url("/notify"))
            .send_string(payload)
            .map(|_| ())
            .map_err(|err| self.map_err("/notify", err))
    }

    pub fn stop(&self) -> Result<(), DaemonError> {
        self.agent
            .post(&self.url("/stop"))
            .send_string("")
            .map(|_| ())
            .map_err(|err| self.map_err("/stop", err))
    }

    /// Polls `/status` until it answers or `attempts` run out.
    pub fn wait_until_ready(&self, attempts: u32, delay: Duration) -> Result<(), DaemonError> {
        let mut last = None;
        for _ in 0..attempts {
            match self.status() {
                Ok(_) => return Ok(()),
                Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                    last = Some(err);
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last.unwrap_or_else(|| DaemonError::DaemonNotRunning {
            addr: self.base.clone(),
        }))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn map_err(&self, path: &str, err: ureq::Error) -> DaemonError {
        match err {
            ureq::Error::Status(code, _) => DaemonError::Http(format!("{path} returned {code}")),
            ureq::Error::Transport(transport)
                if transport.kind() == ureq::ErrorKind::ConnectionFailed =>
            {
                DaemonError::DaemonNotRunning {
                    addr: self.base.clone(),
                }
            }
            ureq::Error::Transport(transport) => DaemonError::Http(transport.to_string()),
        }
    }
}

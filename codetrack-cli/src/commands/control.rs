//! `codetrack control`: status / notify / stop against a running tracker.

use std::net::IpAddr;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use codetrack_daemon::paths::{DEFAULT_LISTENING_HOST, DEFAULT_LISTENING_PORT};
use codetrack_daemon::{ControlClient, DaemonError};

#[derive(Args, Debug)]
pub struct ControlArgs {
    #[command(subcommand)]
    pub command: ControlCommand,

    #[arg(long, global = true, default_value_t = DEFAULT_LISTENING_HOST)]
    pub listening_host: IpAddr,

    #[arg(long, global = true, default_value_t = DEFAULT_LISTENING_PORT)]
    pub listening_port: u16,
}

#[derive(Subcommand, Debug)]
pub enum ControlCommand {
    /// Check whether the tracker is running.
    Status,
    /// Tag the current recording with a payload.
    Notify { payload: String },
    /// Ask the tracker to stop, upload and exit.
    Stop,
}

impl ControlArgs {
    pub fn run(self) -> Result<()> {
        let client = ControlClient::for_host(&self.listening_host.to_string(), self.listening_port);
        match self.command {
            ControlCommand::Status => match client.status() {
                Ok(body) => print!("{body}"),
                Err(DaemonError::DaemonNotRunning { .. }) => println!("tracker is not running"),
                Err(err) => return Err(err).context("failed to query tracker status"),
            },
            ControlCommand::Notify { payload } => {
                client.notify(&payload).context("failed to notify tracker")?;
                println!("notified: {payload}");
            }
            ControlCommand::Stop => match client.stop() {
                Ok(()) => println!("stop requested"),
                Err(DaemonError::DaemonNotRunning { .. }) => println!("tracker is not running"),
                Err(err) => return Err(err).context("failed to stop tracker"),
            },
        }
        Ok(())
    }
}

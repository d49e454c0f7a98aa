//! `codetrack track-and-upload`

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use codetrack_daemon::paths::{DEFAULT_LISTENING_HOST, DEFAULT_LISTENING_PORT};
use codetrack_daemon::{start_blocking, TrackOptions, TrackOutcome};

use super::INSUFFICIENT_DISKSPACE_EXIT;

#[derive(Args, Debug)]
pub struct TrackArgs {
    /// The folder that will cache the code snapshots and logs.
    #[arg(long)]
    pub store: PathBuf,

    /// The file containing the remote destination parameters, or `none`.
    #[arg(long)]
    pub config: String,

    /// The folder that contains the source code to track, or `none`.
    #[arg(long)]
    pub sourcecode: String,

    /// Minimum free space (GB) required on the current volume; 0 skips the check.
    #[arg(long = "minimum-required-diskspace-gb", default_value_t = 1)]
    pub minimum_diskspace_gb: u64,

    /// Listening host for the control server.
    #[arg(long, default_value_t = DEFAULT_LISTENING_HOST)]
    pub listening_host: IpAddr,

    /// Listening port for the control server.
    #[arg(long, default_value_t = DEFAULT_LISTENING_PORT)]
    pub listening_port: u16,

    /// Return normally once stopped instead of exiting the process.
    #[arg(long)]
    pub soft_stop: bool,

    /// Enable verbose debug output.
    #[arg(long)]
    pub debug: bool,
}

impl TrackArgs {
    pub fn run(self) -> Result<()> {
        let mut options = TrackOptions::new(&self.store, &self.config, &self.sourcecode);
        options.minimum_diskspace_gb = self.minimum_diskspace_gb;
        options.debug = self.debug;
        options.supervisor.listen_addr = SocketAddr::new(self.listening_host, self.listening_port);

        let outcome = start_blocking(options);
        if matches!(outcome, Ok(TrackOutcome::InsufficientDiskSpace)) {
            std::process::exit(INSUFFICIENT_DISKSPACE_EXIT);
        }
        if !self.soft_stop && outcome.is_ok() {
            std::process::exit(0);
        }
        outcome.map(|_| ()).context("tracker exited with error")
    }
}

//! `codetrack self-test`

use anyhow::{Context, Result};
use clap::Args;

use codetrack_core::DISABLED_SENTINEL;
use codetrack_daemon::{self_test, SelfTestOptions};

use super::INSUFFICIENT_DISKSPACE_EXIT;

#[derive(Args, Debug)]
pub struct SelfTestArgs {
    /// Minimum free space (GB) required on the current volume; 0 skips the check.
    #[arg(long = "minimum-required-diskspace-gb", default_value_t = 1)]
    pub minimum_diskspace_gb: u64,

    /// Remote destination config to probe, or `none`.
    #[arg(long, default_value = DISABLED_SENTINEL)]
    pub config: String,

    /// Enable verbose debug output.
    #[arg(long)]
    pub debug: bool,
}

impl SelfTestArgs {
    pub fn run(self) -> Result<()> {
        let options = SelfTestOptions {
            minimum_diskspace_gb: self.minimum_diskspace_gb,
            config: self.config,
            debug: self.debug,
        };
        let passed = self_test(&options).context("self test failed")?;
        if !passed {
            std::process::exit(INSUFFICIENT_DISKSPACE_EXIT);
        }
        Ok(())
    }
}

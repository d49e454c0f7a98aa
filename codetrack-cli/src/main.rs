//! codetrack: record a source folder and upload it alongside the session logs.
//!
//! # Usage
//!
//! ```text
//! codetrack self-test [--minimum-required-diskspace-gb N] [--config FILE|none]
//! codetrack track-and-upload --store DIR --config FILE|none --sourcecode DIR|none
//!     [--listening-host HOST] [--listening-port PORT] [--soft-stop]
//! codetrack control status|notify <payload>|stop [--listening-host HOST] [--listening-port PORT]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{control::ControlArgs, self_test::SelfTestArgs, track::TrackArgs};

#[derive(Parser, Debug)]
#[command(
    name = "codetrack",
    version,
    about = "Track source code changes and upload recordings",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that this machine can record and upload.
    SelfTest(SelfTestArgs),

    /// Start tracking source code and uploading.
    TrackAndUpload(TrackArgs),

    /// Talk to a running tracker over its control port.
    Control(ControlArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::SelfTest(args) => args.run(),
        Commands::TrackAndUpload(args) => args.run(),
        Commands::Control(args) => args.run(),
    }
}

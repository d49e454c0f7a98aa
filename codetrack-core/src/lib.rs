//! Codetrack core library: domain types, remote config, errors.
//!
//! Public API surface:
//! - [`types`]: worker states, upload statistics, disabled-feature sentinel
//! - [`error`]: [`ConfigError`]
//! - [`config`]: remote destination config loading

pub mod config;
pub mod error;
pub mod types;

pub use config::RemoteConfig;
pub use error::ConfigError;
pub use types::{enabled_path, file_timestamp, UploadStats, WorkerState, DISABLED_SENTINEL};

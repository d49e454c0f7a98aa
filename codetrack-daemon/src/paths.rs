use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LISTENING_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const DEFAULT_LISTENING_PORT: u16 = 41375;

pub const SYNC_EVERY: Duration = Duration::from_secs(5 * 60);
pub const HEALTH_CHECK_EVERY: Duration = Duration::from_secs(3);
pub const METRICS_EVERY: Duration = Duration::from_secs(3);

pub const SNAPSHOT_EVERY: Duration = Duration::from_secs(3 * 60);
pub const KEY_SNAPSHOT_SPACING: u64 = 10;
pub const MAX_RECORDING_DURATION: Duration = Duration::from_secs(12 * 60 * 60);

pub const LOG_FILE_PREFIX: &str = "codetrack";
pub const RECORDING_FILE_PREFIX: &str = "sourcecode";

pub fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(DEFAULT_LISTENING_HOST, DEFAULT_LISTENING_PORT)
}

/// `<store>/sourcecode_<timestamp>.srcs`
pub fn recording_file_path(store: &Path, timestamp: &str) -> PathBuf {
    store.join(format!("{RECORDING_FILE_PREFIX}_{timestamp}.srcs"))
}

/// `<store>/codetrack_<timestamp>_<seq>.log`
pub fn log_file_path(store: &Path, timestamp: &str, seq: u32) -> PathBuf {
    store.join(format!("{LOG_FILE_PREFIX}_{timestamp}_{seq}.log"))
}

/// `<file>.lock`, present while the producer still holds `file` open.
pub fn lock_marker_path(file: &Path) -> PathBuf {
    let mut marker = file.as_os_str().to_owned();
    marker.push(codetrack_sync::LOCK_SUFFIX);
    PathBuf::from(marker)
}

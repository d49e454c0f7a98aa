//! Remote destination configuration.
//!
//! The `--config` file is a small YAML document:
//!
//! ```text
//! bucket: team-recordings
//! prefix: participant-42/
//! root: /mnt/object-store
//! ```
//!
//! `root` is the directory that backs the object store; objects land at
//! `<root>/<bucket>/<prefix><key>`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    pub root: PathBuf,
}

impl RemoteConfig {
    /// Load and validate the config at `path`.
    ///
    /// Returns `ConfigError::ConfigNotFound` if absent,
    /// `ConfigError::Parse` (with path + line context) if malformed YAML.
    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path)?;
        let config: RemoteConfig =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: "bucket must not be empty".to_string(),
            });
        }
        if self.bucket.contains('/') || self.bucket.contains('\\') {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: format!("bucket '{}' must not contain path separators", self.bucket),
            });
        }
        Ok(())
    }
}

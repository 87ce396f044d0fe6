//! User settings, read from `<config dir>/sysmaint/config.toml`.

use crate::error::{MaintenanceError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Default tracing filter, overridden by `RUST_LOG`.
    pub log_level: String,
    /// Where exported logs go. Desktop when unset.
    pub export_dir: Option<PathBuf>,
    pub ping_count: u32,
    pub ping_target: String,
    pub network_step_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            export_dir: None,
            ping_count: 4,
            ping_target: "google.com".to_string(),
            network_step_timeout_secs: 60,
        }
    }
}

impl Settings {
    /// Load from the default location. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns `Config` when the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// # Errors
    ///
    /// Returns `Config` when the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(MaintenanceError::Config(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        };
        Self::from_toml_str(&text)
    }

    /// # Errors
    ///
    /// Returns `Config` on malformed TOML or unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    #[must_use]
    pub const fn network_step_timeout(&self) -> Duration {
        Duration::from_secs(self.network_step_timeout_secs)
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sysmaint").join("config.toml"))
}

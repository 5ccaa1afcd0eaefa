use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ConfigError;

/// Optional defaults for migration runs, read from TOML.
///
/// Every field can be overridden on the command line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Only mailboxes whose display path starts with this are processed
    pub prefix: Option<String>,
    /// Additional Apple Mail store searched for complete copies of partials
    pub secondary_root: Option<PathBuf>,
    /// Separator sender for messages without a `From:` header
    pub fallback_sender: Option<String>,
    /// Show a progress bar while migrating
    pub show_progress: bool,
}

impl MigrationConfig {
    /// Default configuration file location
    pub fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mail-migration").join("config.toml"))
    }

    /// Read a configuration file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: MigrationConfig = toml::from_str(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `explicit` if given, else the default file when it exists, else defaults.
    /// An explicit path that does not exist is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::config_file_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }
}

//! Daemon configuration
//!
//! Defaults, overridden by an optional toml file, overridden by
//! command-line flags / environment (handled by clap in main).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Session daemon configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listen port
    pub port: u16,

    /// Path to the sqlite settings database; None means in-memory
    pub db_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5850,
            db_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a toml file, falling back to defaults
    /// when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.port, 5850);
        assert!(config.db_path.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = toml::from_str("db_path = \"/tmp/resona.db\"").unwrap();
        assert_eq!(config.port, 5850);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/resona.db")));
    }
}

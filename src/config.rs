//! JSON run configuration for the `stakehouse` binary.

use crate::netparams::StaticNetParams;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    /// The file could not be read.
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    /// The file is not a valid configuration document.
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Default log filter, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory receiving one checkpoint per simulated epoch.
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
    /// Directory the simulated stake and collateral ledgers persist in.
    #[serde(default)]
    pub ledger_dir: Option<PathBuf>,
    /// Network parameter overrides applied on top of the defaults.
    #[serde(default)]
    pub netparams: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            checkpoint_dir: None,
            ledger_dir: None,
            netparams: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Reads a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default network parameters with this configuration's overrides applied.
    pub fn netparams(&self) -> StaticNetParams {
        let mut params = StaticNetParams::with_defaults();
        params.extend(&self.netparams);
        params
    }
}

//! Engine configuration loaded from TOML.
//!
//! ```toml
//! dialect = "postgres"
//! force_read_committed = false
//! default_limit = 1000
//! optimize = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::compiler::CompilerOptions;
use crate::query::dialect::Dialect;

/// Knobs shared by the compiler and executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AqlConfig {
    /// SQL dialect to compile for.
    pub dialect: Dialect,
    /// Always request read-committed isolation.
    pub force_read_committed: bool,
    /// Row cap for queries without `limit(...)`.
    pub default_limit: Option<u64>,
    /// Run the optimizer before compiling.
    pub optimize: bool,
}

impl Default for AqlConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Sqlite,
            force_read_committed: false,
            default_limit: None,
            optimize: true,
        }
    }
}

impl AqlConfig {
    /// Caps unbounded queries, for shells and dashboards.
    pub fn interactive() -> Self {
        Self {
            default_limit: Some(1000),
            ..Self::default()
        }
    }

    /// Compiles queries exactly as parsed.
    pub fn unoptimized() -> Self {
        Self {
            optimize: false,
            ..Self::default()
        }
    }

    /// Targets `dialect`, keeping the other defaults.
    pub fn for_dialect(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    /// Parses a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Invalid { source })
    }

    /// Reads and parses the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Compiler settings derived from this configuration.
    pub fn compiler_options(&self) -> CompilerOptions {
        CompilerOptions {
            dialect: self.dialect,
            default_limit: self.default_limit,
        }
    }
}

/// Failures while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid configuration TOML.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// An in-memory document is not valid configuration TOML.
    #[error("invalid config: {source}")]
    Invalid {
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

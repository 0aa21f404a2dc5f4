//! Store configuration loaded from TOML.
//!
//! ```toml
//! busy_timeout_ms = 5000
//! log_level = "info"
//! log_dir = "/var/log/splitstore"
//!
//! [database]
//! kind = "file"
//! path = "/var/lib/splitstore/store.db"
//! ```
//!
//! Every key is optional; missing keys take the [`StoreConfig::default`] value.

use crate::db::{open_db_in_memory, open_db_with_timeout, DbError, Store, DEFAULT_BUSY_TIMEOUT};
use crate::logging::{default_log_level, normalize_level, LoggingError};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Where the SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatabaseLocation {
    /// Private in-memory database, discarded with the process.
    #[default]
    Memory,
    File { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub database: DatabaseLocation,
    pub busy_timeout_ms: u64,
    pub log_level: String,
    /// File logging stays off when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: DatabaseLocation::Memory,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT.as_millis() as u64,
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl StoreConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        info!(
            "event=config_load module=config status=ok path={}",
            path.display()
        );
        Ok(config)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Opens and migrates the configured database.
    pub fn open_store(&self) -> Result<Store, ConfigError> {
        let conn = match &self.database {
            DatabaseLocation::Memory => open_db_in_memory()?,
            DatabaseLocation::File { path } => open_db_with_timeout(path, self.busy_timeout())?,
        };
        Ok(Store::new(conn))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        normalize_level(&self.log_level).map_err(|err: LoggingError| {
            ConfigError::Invalid(err.to_string())
        })?;
        if let DatabaseLocation::File { path } = &self.database {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("database path cannot be empty".to_string()));
            }
        }
        if let Some(dir) = &self.log_dir {
            if !dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "log_dir must be an absolute path, got `{}`",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

//! Store configuration
//!
//! Loaded from a TOML file, then overridden by `LOCKERSTORE_*` environment
//! variables. Every field has a default so an empty file is valid.

use lockerstore_core::logging_facility::Profile;
use lockerstore_core::{StoreError, StoreErrorKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_DB_PATH: &str = "LOCKERSTORE_DB_PATH";
pub const ENV_MAX_OPEN_CONNECTIONS: &str = "LOCKERSTORE_MAX_OPEN_CONNECTIONS";
pub const ENV_DEBUG_SQL: &str = "LOCKERSTORE_DEBUG_SQL";

const DEFAULT_FILE_CONNECTIONS: u32 = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

impl From<ConfigError> for StoreError {
    fn from(err: ConfigError) -> Self {
        StoreError::new(StoreErrorKind::Config)
            .with_op("config")
            .with_message(err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; `None` opens a private in-memory database
    pub path: Option<PathBuf>,
    /// Pool size; defaults to 8 for files and 1 for memory
    pub max_open_connections: Option<u32>,
    pub acquire_timeout_ms: u64,
    pub busy_timeout_ms: u64,
    /// Use write-ahead logging for file databases
    pub wal: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_open_connections: None,
            acquire_timeout_ms: 30_000,
            busy_timeout_ms: 5_000,
            wal: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `development`, `production` or `test`
    pub profile: String,
    /// Emit every generated statement at debug level
    pub debug_sql: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            profile: "development".to_string(),
            debug_sql: false,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.database.path = Some(path.into());
        config
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Read a TOML file and apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)?.with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (process env in production)
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.database.path = if path.is_empty() || path == ":memory:" {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }
        if let Some(raw) = lookup(ENV_MAX_OPEN_CONNECTIONS) {
            let n = raw
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| invalid(ENV_MAX_OPEN_CONNECTIONS, &raw))?;
            self.database.max_open_connections = Some(n);
        }
        if let Some(raw) = lookup(ENV_DEBUG_SQL) {
            self.logging.debug_sql = match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(invalid(ENV_DEBUG_SQL, &raw)),
            };
        }
        Ok(self)
    }

    pub fn is_in_memory(&self) -> bool {
        self.database.path.is_none()
    }

    pub fn max_open_connections(&self) -> usize {
        match (self.database.max_open_connections, self.is_in_memory()) {
            (Some(n), _) => n.max(1) as usize,
            (None, true) => 1,
            (None, false) => DEFAULT_FILE_CONNECTIONS as usize,
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.database.acquire_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.database.busy_timeout_ms)
    }

    pub fn logging_profile(&self) -> Result<Profile, ConfigError> {
        self.logging
            .profile
            .parse()
            .map_err(|_| invalid("logging.profile", &self.logging.profile))
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

//! Store configuration.
//!
//! # Responsibility
//! - Describe where the backing SQLite store lives and how connections are tuned.
//! - Provide defaults usable without any external configuration source.
//!
//! # Invariants
//! - `busy_timeout_ms` is strictly positive.
//! - File locations carry a non-empty path.
//! - `wal` only applies to file stores; in-memory stores ignore it.

use crate::db::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const ENV_DATABASE: &str = "REPOKIT_DATABASE";
const ENV_BUSY_TIMEOUT_MS: &str = "REPOKIT_BUSY_TIMEOUT_MS";
const MEMORY_SENTINEL: &str = ":memory:";

/// Location of the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreLocation {
    /// SQLite database file. Created on first open.
    File { path: PathBuf },
    /// Process-local in-memory database on SQLite's `memdb` VFS.
    ///
    /// Every session opened from the same `Store` sees the same data. A blank
    /// name is replaced by a generated one when the store opens.
    Memory {
        #[serde(default)]
        name: String,
    },
}

impl Default for StoreLocation {
    fn default() -> Self {
        Self::Memory {
            name: String::new(),
        }
    }
}

/// Connection settings applied to every session connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub location: StoreLocation,
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Enables `PRAGMA foreign_keys`.
    pub foreign_keys: bool,
    /// Switches file stores to write-ahead logging.
    pub wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: StoreLocation::default(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            foreign_keys: true,
            wal: true,
        }
    }
}

impl StoreConfig {
    /// File-backed config with default tuning.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::File { path: path.into() },
            ..Self::default()
        }
    }

    /// Named in-memory config with default tuning.
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            location: StoreLocation::Memory { name: name.into() },
            ..Self::default()
        }
    }

    /// Builds a config from `REPOKIT_DATABASE` and `REPOKIT_BUSY_TIMEOUT_MS`.
    ///
    /// Unset variables fall back to defaults. `REPOKIT_DATABASE=:memory:`
    /// selects an anonymous in-memory store.
    ///
    /// # Errors
    /// - Returns `DbError::InvalidConfig` when the timeout is not a number.
    pub fn from_env() -> DbResult<Self> {
        let mut config = Self::default();

        if let Ok(database) = std::env::var(ENV_DATABASE) {
            let trimmed = database.trim();
            if !trimmed.is_empty() && trimmed != MEMORY_SENTINEL {
                config.location = StoreLocation::File {
                    path: PathBuf::from(trimmed),
                };
            }
        }

        if let Ok(raw) = std::env::var(ENV_BUSY_TIMEOUT_MS) {
            config.busy_timeout_ms = raw.trim().parse().map_err(|_| {
                DbError::InvalidConfig(format!(
                    "{ENV_BUSY_TIMEOUT_MS} must be an unsigned integer, got `{raw}`"
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects configs that cannot produce a usable connection.
    pub fn validate(&self) -> DbResult<()> {
        if self.busy_timeout_ms == 0 {
            return Err(DbError::InvalidConfig(
                "busy_timeout_ms must be greater than zero".to_string(),
            ));
        }
        match &self.location {
            StoreLocation::File { path } if path.as_os_str().is_empty() => {
                Err(DbError::InvalidConfig(
                    "file store path cannot be empty".to_string(),
                ))
            }
            // The name is embedded in a SQLite URI.
            StoreLocation::Memory { name }
                if !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') =>
            {
                Err(DbError::InvalidConfig(format!(
                    "memory store name `{name}` may only contain [A-Za-z0-9_-]"
                )))
            }
            _ => Ok(()),
        }
    }
}

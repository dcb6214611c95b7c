//! Store handle that sessions open their connections from.
//!
//! # Invariants
//! - An in-memory store stays alive for as long as its `Store` lives,
//!   even when no session is open.
//! - `config()` always reports a resolved location (memory names are never blank).

use super::open::open_connection;
use super::DbResult;
use crate::config::{StoreConfig, StoreLocation};
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use uuid::Uuid;

/// Connection source for one backing database.
pub struct Store {
    config: StoreConfig,
    _keepalive: Option<Mutex<Connection>>,
}

impl Store {
    /// Validates `config`, resolves anonymous memory names and verifies the
    /// database can be opened.
    ///
    /// # Errors
    /// - `DbError::InvalidConfig` for invalid configs.
    /// - `DbError::Sqlite` when the first connection cannot be opened.
    pub fn open(mut config: StoreConfig) -> DbResult<Self> {
        config.validate()?;

        if let StoreLocation::Memory { name } = &mut config.location {
            if name.is_empty() {
                *name = format!("repokit-{}", Uuid::new_v4().simple());
            }
        }

        let first = open_connection(&config)?;
        let keepalive = match config.location {
            StoreLocation::Memory { .. } => Some(Mutex::new(first)),
            StoreLocation::File { .. } => None,
        };

        Ok(Self {
            config,
            _keepalive: keepalive,
        })
    }

    /// Opens a private in-memory store under a generated name.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open(StoreConfig::memory(""))
    }

    /// Opens a new connection to this store.
    pub fn connect(&self) -> DbResult<Connection> {
        open_connection(&self.config)
    }

    /// Executes caller-owned DDL (table definitions) against the store.
    ///
    /// Schema evolution is out of scope here; this only runs the given batch.
    pub fn apply_schema(&self, sql: &str) -> DbResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(sql)?;
        info!("event=schema_apply module=db status=ok");
        Ok(())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

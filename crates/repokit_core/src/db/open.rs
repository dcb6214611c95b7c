//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or process-wide in-memory SQLite connections.
//! - Configure connection pragmas from `StoreConfig`.
//!
//! # Invariants
//! - Returned connections honor `foreign_keys` and `busy_timeout_ms`.
//! - Memory locations must already carry a non-empty name.
//! - Memory stores use the `memdb` VFS, so lock conflicts wait on
//!   `busy_timeout` exactly like file stores do.

use super::{DbError, DbResult};
use crate::config::{StoreConfig, StoreLocation};
use log::{error, info};
use rusqlite::{Connection, OpenFlags};
use std::time::{Duration, Instant};

/// Opens one connection for `config.location` and applies connection pragmas.
///
/// # Side effects
/// - Creates the database file when it does not exist.
/// - Emits `db_open` logging events with duration and status.
pub fn open_connection(config: &StoreConfig) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = mode_label(&config.location);
    info!("event=db_open module=db status=start mode={mode}");

    let result = connect(config).and_then(|mut conn| {
        bootstrap_connection(&mut conn, config)?;
        Ok(conn)
    });

    match &result {
        Ok(_) => info!(
            "event=db_open module=db status=ok mode={mode} duration_ms={}",
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
            started_at.elapsed().as_millis(),
            err
        ),
    }

    result
}

fn connect(config: &StoreConfig) -> DbResult<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    match &config.location {
        StoreLocation::File { path } => Ok(Connection::open_with_flags(path, flags)?),
        StoreLocation::Memory { name } => {
            if name.is_empty() {
                return Err(DbError::InvalidConfig(
                    "memory store name must be resolved before connecting".to_string(),
                ));
            }
            Ok(Connection::open_with_flags(memory_uri(name), flags)?)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection, config: &StoreConfig) -> DbResult<()> {
    let foreign_keys = if config.foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;

    if config.wal && matches!(config.location, StoreLocation::File { .. }) {
        // journal_mode returns the resulting mode as a row.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    }

    Ok(())
}

/// A leading `/` makes the `memdb` database visible to every connection in
/// the process that opens the same name.
fn memory_uri(name: &str) -> String {
    format!("file:/{name}?vfs=memdb")
}

fn mode_label(location: &StoreLocation) -> &'static str {
    match location {
        StoreLocation::File { .. } => "file",
        StoreLocation::Memory { .. } => "memory",
    }
}

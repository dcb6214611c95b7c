//! SQLite storage bootstrap and connection source.
//!
//! # Responsibility
//! - Open and configure SQLite connections for sessions.
//! - Own the store handle every session connection is opened from.
//!
//! # Invariants
//! - Every returned connection has pragmas from `StoreConfig` applied.
//! - Schema management belongs to callers; this layer never migrates.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod open;
mod store;

pub use open::open_connection;
pub use store::Store;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    InvalidConfig(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::InvalidConfig(message) => write!(f, "invalid store config: {message}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::InvalidConfig(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

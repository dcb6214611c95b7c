//! Sessions and the per-unit-of-work session registry.
//!
//! # Responsibility
//! - Track entity state transitions and persist them atomically per commit.
//! - Guarantee one live session per unit of work.
//!
//! # Invariants
//! - A commit applies every pending transition in one `IMMEDIATE` transaction
//!   or none of them.
//! - The registry never hands out two different sessions for one scope.

use crate::db::DbError;
use crate::model::entity::DescriptorError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

mod registry;
mod tracker;

pub use registry::{SessionHandle, SessionRegistry, UnitOfWork};
pub use tracker::{CommitOutcome, EntryId, Session};

pub type SessionResult<T> = Result<T, SessionError>;

/// Identity of one session instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one logical unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitOfWorkId(Uuid);

impl UnitOfWorkId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for UnitOfWorkId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session-level failures.
#[derive(Debug)]
pub enum SessionError {
    /// The session connection could not be opened.
    Connection(DbError),
    /// A commit was rejected by the store; nothing was persisted.
    Commit {
        pending: usize,
        source: rusqlite::Error,
    },
    /// A read against the session connection failed.
    Query(rusqlite::Error),
    /// The entity type maps onto an invalid table shape.
    Descriptor(DescriptorError),
    /// Modify/delete requested for an entity without identity.
    MissingKey { table: &'static str },
    /// `column_values()` length disagrees with `COLUMNS`.
    ColumnCountMismatch {
        table: &'static str,
        expected: usize,
        actual: usize,
    },
    /// The entry id is not tracked by this session.
    UnknownEntry(EntryId),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(err) => write!(f, "session connection failed: {err}"),
            Self::Commit { pending, source } => {
                write!(f, "commit of {pending} pending change(s) failed: {source}")
            }
            Self::Query(err) => write!(f, "session query failed: {err}"),
            Self::Descriptor(err) => write!(f, "{err}"),
            Self::MissingKey { table } => {
                write!(f, "entity in `{table}` has no key and cannot be attached for update/delete")
            }
            Self::ColumnCountMismatch {
                table,
                expected,
                actual,
            } => write!(
                f,
                "entity in `{table}` produced {actual} column value(s), expected {expected}"
            ),
            Self::UnknownEntry(id) => write!(f, "entry {id} is not tracked by this session"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Connection(err) => Some(err),
            Self::Commit { source, .. } => Some(source),
            Self::Query(err) => Some(err),
            Self::Descriptor(err) => Some(err),
            Self::MissingKey { .. } => None,
            Self::ColumnCountMismatch { .. } => None,
            Self::UnknownEntry(_) => None,
        }
    }
}

impl From<DbError> for SessionError {
    fn from(value: DbError) -> Self {
        Self::Connection(value)
    }
}

impl From<DescriptorError> for SessionError {
    fn from(value: DescriptorError) -> Self {
        Self::Descriptor(value)
    }
}

impl From<rusqlite::Error> for SessionError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Query(value)
    }
}

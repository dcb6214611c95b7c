//! Generic repository over scope-bound sessions.
//!
//! # Responsibility
//! - Expose CRUD and paged queries for any `Entity` type.
//! - Resolve the calling scope's session on every operation.
//!
//! # Invariants
//! - Each add/update/delete commits exactly once.
//! - Store failures surface unchanged; nothing is retried here.
//! - "No rows affected" is reported as `false`, never as an error.

use crate::db::DbError;
use crate::query::QueryError;
use crate::session::{Session, SessionError, SessionRegistry, UnitOfWork, UnitOfWorkId};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod entity_query;
pub mod entity_repo;

pub use entity_query::EntityQuery;
pub use entity_repo::{Repository, SessionRepository};

pub type RepoResult<T> = Result<T, RepoError>;

/// Coarse failure class callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Store unreachable or session construction failed.
    Connection,
    /// Commit rejected by the store; nothing was persisted.
    Commit,
    /// A read failed in the store.
    Query,
    /// Caller broke an API contract (bad paging, unknown column, keyless update...).
    ContractViolation,
    /// Persisted rows cannot be decoded into the entity type.
    InvalidData,
}

#[derive(Debug)]
pub enum RepoError {
    Session(SessionError),
    Query(QueryError),
    /// The scope's session is already in use by another call.
    SessionInUse(UnitOfWorkId),
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    InvalidData(String),
}

impl RepoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Session(SessionError::Connection(_)) => ErrorKind::Connection,
            Self::Session(SessionError::Commit { .. }) => ErrorKind::Commit,
            Self::Session(SessionError::Query(_)) => ErrorKind::Query,
            Self::Session(
                SessionError::Descriptor(_)
                | SessionError::MissingKey { .. }
                | SessionError::ColumnCountMismatch { .. }
                | SessionError::UnknownEntry(_),
            ) => ErrorKind::ContractViolation,
            Self::Query(_)
            | Self::SessionInUse(_)
            | Self::MissingRequiredTable(_)
            | Self::MissingRequiredColumn { .. } => ErrorKind::ContractViolation,
            Self::InvalidData(_) => ErrorKind::InvalidData,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session(err) => write!(f, "{err}"),
            Self::Query(err) => write!(f, "{err}"),
            Self::SessionInUse(scope) => {
                write!(f, "session of unit of work {scope} is already in use")
            }
            Self::MissingRequiredTable(table) => {
                write!(f, "repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted entity data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Session(err) => Some(err),
            Self::Query(err) => Some(err),
            Self::SessionInUse(_) => None,
            Self::MissingRequiredTable(_) => None,
            Self::MissingRequiredColumn { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<SessionError> for RepoError {
    fn from(value: SessionError) -> Self {
        Self::Session(value)
    }
}

impl From<QueryError> for RepoError {
    fn from(value: QueryError) -> Self {
        Self::Query(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Session(SessionError::Connection(value))
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Session(SessionError::Query(value))
    }
}

/// Runs `operation` against the session of `scope`.
///
/// The session is taken without blocking; a session held by another call
/// yields `RepoError::SessionInUse` instead of a deadlock.
pub(crate) fn with_session<R>(
    registry: &SessionRegistry,
    scope: &UnitOfWork,
    operation: impl FnOnce(&mut Session) -> RepoResult<R>,
) -> RepoResult<R> {
    let handle = registry.current_session(scope)?;
    let Some(mut session) = handle.try_lock() else {
        return Err(RepoError::SessionInUse(scope.id()));
    };
    operation(&mut *session)
}

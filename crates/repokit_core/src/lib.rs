//! Generic SQLite data-access layer.
//! One session per unit of work, and a typed repository per entity on top of it.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod session;

pub use config::{StoreConfig, StoreLocation};
pub use db::{DbError, DbResult, Store};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::entity::{Entity, EntityDescriptor, EntityState, StateTransition};
pub use query::{CompareOp, Filter, PageRequest, PageResult, QueryError, SortKey};
pub use repo::{EntityQuery, ErrorKind, RepoError, RepoResult, Repository, SessionRepository};
pub use session::{
    CommitOutcome, EntryId, Session, SessionError, SessionHandle, SessionId, SessionRegistry,
    SessionResult, UnitOfWork, UnitOfWorkId,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

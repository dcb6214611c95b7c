//! Per-unit-of-work session registry.
//!
//! # Responsibility
//! - Resolve the one session that belongs to a unit of work, creating it on
//!   first request.
//! - Make scope lifetime explicit through `UnitOfWork` handles and `end_scope`.
//!
//! # Invariants
//! - At most one session per `UnitOfWorkId` is ever inserted.
//! - Lookups of an existing scope never create or replace its session.
//! - Entries are removed only by `end_scope`; nothing is evicted implicitly.

use super::tracker::Session;
use super::{SessionResult, UnitOfWorkId};
use crate::config::StoreConfig;
use crate::db::{DbResult, Store};
use dashmap::DashMap;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared handle to a scope's session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Explicit handle naming one logical unit of work.
///
/// Copy it into every call that must share a session; mint a new one per
/// request, job or transaction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitOfWork {
    id: UnitOfWorkId,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self {
            id: UnitOfWorkId::new(),
        }
    }

    /// Handle bound to the calling thread, stable for the thread's lifetime.
    ///
    /// Pooled threads keep the same handle across unrelated work, so callers
    /// using this must `end_scope` at their own boundaries.
    pub fn current_thread() -> Self {
        thread_local! {
            static THREAD_SCOPE: UnitOfWorkId = UnitOfWorkId::new();
        }
        THREAD_SCOPE.with(|id| Self { id: *id })
    }

    pub fn id(&self) -> UnitOfWorkId {
        self.id
    }
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide map from unit of work to its session.
pub struct SessionRegistry {
    store: Store,
    sessions: DashMap<UnitOfWorkId, SessionHandle>,
}

impl SessionRegistry {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            sessions: DashMap::new(),
        }
    }

    /// Opens the store described by `config` and wraps it in an empty registry.
    pub fn open(config: StoreConfig) -> DbResult<Self> {
        Ok(Self::new(Store::open(config)?))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn begin_scope(&self) -> UnitOfWork {
        UnitOfWork::new()
    }

    /// Returns the session of `scope`, opening it on first request.
    ///
    /// The connection opens outside the map; racing first requests for the
    /// same scope may each open one, but only the first inserted is kept and
    /// returned to every caller.
    ///
    /// # Errors
    /// - `SessionError::Connection` when the session connection cannot open.
    pub fn current_session(&self, scope: &UnitOfWork) -> SessionResult<SessionHandle> {
        if let Some(existing) = self.sessions.get(&scope.id()) {
            return Ok(Arc::clone(existing.value()));
        }

        let opened = Arc::new(Mutex::new(Session::open(&self.store, scope.id())?));
        let resolved = Arc::clone(
            self.sessions
                .entry(scope.id())
                .or_insert_with(|| Arc::clone(&opened))
                .value(),
        );
        if !Arc::ptr_eq(&resolved, &opened) {
            debug!(
                "event=session_open module=session status=discarded scope={}",
                scope.id()
            );
        }
        Ok(resolved)
    }

    /// Removes the scope's session. It closes once in-flight callers release it.
    ///
    /// Returns `false` when the scope never opened a session.
    pub fn end_scope(&self, scope: &UnitOfWork) -> bool {
        let removed = self.sessions.remove(&scope.id()).is_some();
        debug!(
            "event=scope_end module=session status=ok scope={} removed={}",
            scope.id(),
            removed
        );
        removed
    }

    pub fn contains(&self, scope: &UnitOfWork) -> bool {
        self.sessions.contains_key(&scope.id())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

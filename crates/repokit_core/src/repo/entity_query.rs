//! Deferred, restartable entity queries.
//!
//! # Responsibility
//! - Hold a filter (and optional in-process predicate) without touching the store.
//! - Execute against the scope's session each time results are consumed.
//!
//! # Invariants
//! - Building or refining a query performs no I/O.
//! - Every consumption re-runs the query; results reflect the store at that time.
//! - The SQL filter always narrows rows before the in-process predicate runs.

use super::{with_session, RepoError, RepoResult};
use crate::model::entity::{quote_ident, Entity, EntityDescriptor};
use crate::query::Filter;
use crate::session::{SessionRegistry, UnitOfWork};
use rusqlite::{params_from_iter, Row};
use std::ops::ControlFlow;

type Predicate<'q, T> = Box<dyn Fn(&T) -> bool + 'q>;

/// Lazy sequence of entities matching a filter.
pub struct EntityQuery<'q, T: Entity> {
    registry: &'q SessionRegistry,
    scope: UnitOfWork,
    descriptor: EntityDescriptor,
    filter: Filter,
    predicate: Option<Predicate<'q, T>>,
}

impl<'q, T: Entity + 'q> EntityQuery<'q, T> {
    pub(crate) fn new(registry: &'q SessionRegistry, scope: UnitOfWork, filter: Filter) -> Self {
        Self {
            registry,
            scope,
            descriptor: EntityDescriptor::of::<T>(),
            filter,
            predicate: None,
        }
    }

    /// Narrows the SQL filter with another conjunct.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = std::mem::take(&mut self.filter).and(filter);
        self
    }

    /// Adds a predicate evaluated on decoded entities after the SQL filter.
    ///
    /// Chained predicates must all hold.
    pub fn where_in_process(mut self, predicate: impl Fn(&T) -> bool + 'q) -> Self {
        let combined: Predicate<'q, T> = match self.predicate.take() {
            None => Box::new(predicate),
            Some(existing) => Box::new(move |entity: &T| existing(entity) && predicate(entity)),
        };
        self.predicate = Some(combined);
        self
    }

    pub fn sql_filter(&self) -> &Filter {
        &self.filter
    }

    /// Streams matching entities into `visit` one row at a time.
    pub fn try_for_each(&self, mut visit: impl FnMut(T) -> RepoResult<()>) -> RepoResult<()> {
        self.scan(|entity| {
            visit(entity)?;
            Ok(ControlFlow::Continue(()))
        })
    }

    pub fn to_vec(&self) -> RepoResult<Vec<T>> {
        let mut items = Vec::new();
        self.try_for_each(|entity| {
            items.push(entity);
            Ok(())
        })?;
        Ok(items)
    }

    /// First match in store order, reading no further rows.
    pub fn first(&self) -> RepoResult<Option<T>> {
        let mut found = None;
        self.scan(|entity| {
            found = Some(entity);
            Ok(ControlFlow::Break(()))
        })?;
        Ok(found)
    }

    /// Number of matches. Without an in-process predicate this is a single
    /// `COUNT(*)` and no rows are decoded.
    pub fn count(&self) -> RepoResult<u64> {
        if self.predicate.is_none() {
            let mut binds = Vec::new();
            let where_sql = self.filter.to_sql(&self.descriptor, &mut binds)?;
            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE {where_sql};",
                quote_ident(self.descriptor.table)
            );
            return with_session(self.registry, &self.scope, |session| {
                let total: i64 =
                    session
                        .connection()
                        .query_row(&sql, params_from_iter(binds.iter()), |row| row.get(0))?;
                Ok(u64::try_from(total).unwrap_or(0))
            });
        }

        let mut total = 0_u64;
        self.try_for_each(|_| {
            total += 1;
            Ok(())
        })?;
        Ok(total)
    }

    fn scan(&self, mut visit: impl FnMut(T) -> RepoResult<ControlFlow<()>>) -> RepoResult<()> {
        let mut binds = Vec::new();
        let where_sql = self.filter.to_sql(&self.descriptor, &mut binds)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {where_sql};",
            self.descriptor.select_list(),
            quote_ident(self.descriptor.table)
        );

        with_session(self.registry, &self.scope, |session| {
            let mut stmt = session.connection().prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(binds.iter()))?;
            while let Some(row) = rows.next()? {
                let entity = decode_row::<T>(row)?;
                if let Some(predicate) = self.predicate.as_ref() {
                    if !predicate(&entity) {
                        continue;
                    }
                }
                if visit(entity)?.is_break() {
                    break;
                }
            }
            Ok(())
        })
    }
}

/// Maps one selected row onto `T`, reporting conversion failures as bad data.
pub(crate) fn decode_row<T: Entity>(row: &Row<'_>) -> RepoResult<T> {
    T::from_row(row).map_err(|err| {
        RepoError::InvalidData(format!("cannot decode `{}` row: {err}", T::TABLE))
    })
}

//! Generic entity repository contract and its session-backed implementation.
//!
//! # Responsibility
//! - Map add/update/delete onto session state transitions plus one commit.
//! - Leave nothing tracked after a successful write, so long-lived scopes
//!   do not accumulate entries.
//! - Serve filtered reads and consistent paged reads with a total count.
//!
//! # Invariants
//! - `try_new` succeeds only when the entity's table and every mapped column exist.
//! - Paged reads take the count and the page from one read snapshot.
//! - Page order is the requested sort, then the key column ascending.

use super::entity_query::{decode_row, EntityQuery};
use super::{with_session, RepoError, RepoResult};
use crate::model::entity::{quote_ident, Entity, EntityDescriptor, StateTransition};
use crate::query::page::sort_entities;
use crate::query::{Filter, PageRequest, PageResult};
use crate::session::{SessionError, SessionRegistry, UnitOfWork};
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::marker::PhantomData;
use std::time::Instant;

/// Persistence operations available for one entity type.
pub trait Repository<T: Entity> {
    /// Inserts `entity` and returns it with any store-assigned key applied.
    fn add_entity(&self, entity: T) -> RepoResult<T>;
    /// Deletes the row with the entity's key. `false` when no row matched.
    fn delete_entity(&self, entity: &T) -> RepoResult<bool>;
    /// Overwrites every mapped column of the keyed row. `false` when no row matched.
    fn update_entity(&self, entity: &T) -> RepoResult<bool>;
    /// Deferred query over rows matching `filter`.
    fn load_entities(&self, filter: Filter) -> EntityQuery<'_, T>;
    /// One ordered page plus the count of all matching rows.
    fn load_page_entities(&self, request: &PageRequest) -> RepoResult<PageResult<T>>;
    /// Count of rows matching `filter`.
    fn count(&self, filter: Filter) -> RepoResult<u64>;
}

/// Repository resolving the session of a fixed unit of work on every call.
pub struct SessionRepository<'r, T: Entity> {
    registry: &'r SessionRegistry,
    scope: UnitOfWork,
    descriptor: EntityDescriptor,
    _entity: PhantomData<fn() -> T>,
}

impl<'r, T: Entity> SessionRepository<'r, T> {
    /// Binds a repository for `T` to `scope`, checking the schema first.
    ///
    /// # Errors
    /// - `ContractViolation` when the entity mapping is invalid or the table
    ///   or one of its mapped columns is missing.
    /// - `Connection` when the scope's session cannot be opened.
    pub fn try_new(registry: &'r SessionRegistry, scope: UnitOfWork) -> RepoResult<Self> {
        let descriptor = EntityDescriptor::of::<T>();
        descriptor.validate().map_err(SessionError::from)?;

        with_session(registry, &scope, |session| {
            ensure_entity_table_ready(session.connection(), &descriptor)
        })?;

        Ok(Self {
            registry,
            scope,
            descriptor,
            _entity: PhantomData,
        })
    }

    pub fn scope(&self) -> UnitOfWork {
        self.scope
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    /// Like `load_entities`, with `predicate` applied to decoded entities.
    pub fn load_entities_where<'q>(
        &'q self,
        filter: Filter,
        predicate: impl Fn(&T) -> bool + 'q,
    ) -> EntityQuery<'q, T> {
        self.load_entities(filter).where_in_process(predicate)
    }

    /// Paged read for predicates SQL cannot express.
    ///
    /// Rows are narrowed by `request.filter` in the store, then by
    /// `predicate` in process, then ordered and sliced exactly like
    /// `load_page_entities`.
    pub fn load_page_entities_where<'q>(
        &'q self,
        request: &PageRequest,
        predicate: impl Fn(&T) -> bool + 'q,
    ) -> RepoResult<PageResult<T>> {
        request.validate()?;
        let slot = request.sort.slot(&self.descriptor)?;
        let started_at = Instant::now();

        let matching = self
            .load_entities(request.filter.clone())
            .where_in_process(predicate)
            .to_vec()?;
        let total = matching.len() as u64;
        let offset = usize::try_from(request.offset()).unwrap_or(usize::MAX);
        let items: Vec<T> = sort_entities(matching, slot, request.ascending)
            .into_iter()
            .skip(offset)
            .take(request.page_size as usize)
            .collect();

        debug!(
            "event=page_query module=repo status=ok table={} mode=in_process page_index={} page_size={} total={} returned={} duration_ms={}",
            self.descriptor.table,
            request.page_index,
            request.page_size,
            total,
            items.len(),
            started_at.elapsed().as_millis()
        );

        Ok(PageResult {
            items,
            total,
            page_index: request.page_index,
            page_size: request.page_size,
        })
    }

    fn commit_one(&self, entity: &T, transition: StateTransition) -> RepoResult<usize> {
        with_session(self.registry, &self.scope, |session| {
            let entry = session.track(entity, transition)?;
            let outcome = session.commit()?;
            session.detach(entry);
            Ok(outcome.affected_by(entry))
        })
    }
}

impl<T: Entity> Repository<T> for SessionRepository<'_, T> {
    fn add_entity(&self, mut entity: T) -> RepoResult<T> {
        let assigned = with_session(self.registry, &self.scope, |session| {
            let entry = session.track(&entity, StateTransition::Added)?;
            let outcome = session.commit()?;
            session.detach(entry);
            Ok(outcome.assigned_key(entry))
        })?;
        if let Some(rowid) = assigned {
            entity.assign_key(rowid);
        }
        Ok(entity)
    }

    fn delete_entity(&self, entity: &T) -> RepoResult<bool> {
        let affected = self.commit_one(entity, StateTransition::Deleted)?;
        Ok(affected > 0)
    }

    fn update_entity(&self, entity: &T) -> RepoResult<bool> {
        let affected = self.commit_one(entity, StateTransition::Modified)?;
        Ok(affected > 0)
    }

    fn load_entities(&self, filter: Filter) -> EntityQuery<'_, T> {
        EntityQuery::new(self.registry, self.scope, filter)
    }

    fn load_page_entities(&self, request: &PageRequest) -> RepoResult<PageResult<T>> {
        request.validate()?;
        let started_at = Instant::now();

        let mut binds = Vec::new();
        let where_sql = request.filter.to_sql(&self.descriptor, &mut binds)?;
        let order_sql = request.sort.order_by_sql(&self.descriptor, request.ascending)?;
        let table = quote_ident(self.descriptor.table);
        let count_sql = format!("SELECT COUNT(*) FROM {table} WHERE {where_sql};");
        let page_sql = format!(
            "SELECT {} FROM {table} WHERE {where_sql} ORDER BY {order_sql} LIMIT ? OFFSET ?;",
            self.descriptor.select_list()
        );
        let mut page_binds = binds.clone();
        page_binds.push(Value::Integer(i64::from(request.page_size)));
        page_binds.push(Value::Integer(
            i64::try_from(request.offset()).unwrap_or(i64::MAX),
        ));

        let result = with_session(self.registry, &self.scope, |session| {
            session.read_snapshot(|conn| -> RepoResult<(u64, Vec<T>)> {
                let total: i64 =
                    conn.query_row(&count_sql, params_from_iter(binds.iter()), |row| row.get(0))?;

                let mut stmt = conn.prepare(&page_sql)?;
                let mut rows = stmt.query(params_from_iter(page_binds.iter()))?;
                let mut items = Vec::new();
                while let Some(row) = rows.next()? {
                    items.push(decode_row::<T>(row)?);
                }
                Ok((u64::try_from(total).unwrap_or(0), items))
            })
        });

        let (total, items) = match result {
            Ok(page) => page,
            Err(err) => {
                warn!(
                    "event=page_query module=repo status=error table={} page_index={} page_size={} duration_ms={} error={}",
                    self.descriptor.table,
                    request.page_index,
                    request.page_size,
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err);
            }
        };

        debug!(
            "event=page_query module=repo status=ok table={} mode=sql page_index={} page_size={} total={} returned={} duration_ms={}",
            self.descriptor.table,
            request.page_index,
            request.page_size,
            total,
            items.len(),
            started_at.elapsed().as_millis()
        );

        Ok(PageResult {
            items,
            total,
            page_index: request.page_index,
            page_size: request.page_size,
        })
    }

    fn count(&self, filter: Filter) -> RepoResult<u64> {
        self.load_entities(filter).count()
    }
}

fn ensure_entity_table_ready(conn: &Connection, descriptor: &EntityDescriptor) -> RepoResult<()> {
    if !table_exists(conn, descriptor.table)? {
        return Err(RepoError::MissingRequiredTable(descriptor.table));
    }

    let present = table_columns(conn, descriptor.table)?;
    let required = std::iter::once(&descriptor.key_column).chain(descriptor.columns.iter());
    for column in required {
        if !present
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(column))
        {
            return Err(RepoError::MissingRequiredColumn {
                table: descriptor.table,
                column: *column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get::<_, String>(1)?);
    }
    Ok(columns)
}

//! Change-tracking session over one SQLite connection.
//!
//! # Responsibility
//! - Track attached entities and the transition requested for each.
//! - Persist every pending transition atomically on `commit`.
//!
//! # Invariants
//! - One tracked entry per `(table, key)`; re-attaching refreshes its row image.
//! - Successful commit: Added/Modified -> Unchanged, Deleted -> Detached.
//! - Failed commit: every entry keeps its pre-commit state.
//! - Modified entries are written as full rows, never as column diffs.
//! - Committed entries stay tracked as Unchanged until `detach`/`clear`.

use super::{SessionError, SessionId, SessionResult, UnitOfWorkId};
use crate::db::Store;
use crate::model::entity::{quote_ident, Entity, EntityDescriptor, EntityState, StateTransition};
use log::{debug, error, info};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Handle to one tracked entry inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl Display for EntryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of one successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Rows affected across every applied statement.
    pub affected: usize,
    /// Rows affected per committed entry.
    pub affected_by_entry: BTreeMap<EntryId, usize>,
    /// Rowids SQLite assigned to keyless inserts.
    pub assigned_keys: BTreeMap<EntryId, i64>,
}

impl CommitOutcome {
    pub fn assigned_key(&self, entry: EntryId) -> Option<i64> {
        self.assigned_keys.get(&entry).copied()
    }

    /// Zero for entries that were not part of this commit.
    pub fn affected_by(&self, entry: EntryId) -> usize {
        self.affected_by_entry.get(&entry).copied().unwrap_or(0)
    }
}

struct TrackedEntry {
    descriptor: EntityDescriptor,
    key: Option<Value>,
    values: Vec<Value>,
    state: EntityState,
    marked_at: u64,
}

impl TrackedEntry {
    fn is_pending(&self) -> bool {
        matches!(
            self.state,
            EntityState::Added | EntityState::Modified | EntityState::Deleted
        )
    }
}

/// One unit-of-work connection plus its change tracker.
///
/// Sessions are `Send` but not `Sync`; the registry wraps them in a mutex so
/// one scope's session is never driven from two callers at once.
pub struct Session {
    id: SessionId,
    scope: UnitOfWorkId,
    conn: Connection,
    entries: BTreeMap<EntryId, TrackedEntry>,
    identity: HashMap<(&'static str, String), EntryId>,
    next_entry: u64,
    next_mark: u64,
}

impl Session {
    pub(crate) fn open(store: &Store, scope: UnitOfWorkId) -> SessionResult<Self> {
        let conn = store.connect()?;
        let session = Self {
            id: SessionId::new(),
            scope,
            conn,
            entries: BTreeMap::new(),
            identity: HashMap::new(),
            next_entry: 1,
            next_mark: 1,
        };
        info!(
            "event=session_open module=session status=ok session={} scope={}",
            session.id, scope
        );
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn scope(&self) -> UnitOfWorkId {
        self.scope
    }

    /// Starts tracking `entity` as Unchanged, or refreshes the row image of
    /// the entry already tracked under the same key.
    pub fn attach<T: Entity>(&mut self, entity: &T) -> SessionResult<EntryId> {
        let descriptor = EntityDescriptor::of::<T>();
        descriptor.validate()?;

        let values = entity.column_values();
        if values.len() != descriptor.columns.len() {
            return Err(SessionError::ColumnCountMismatch {
                table: descriptor.table,
                expected: descriptor.columns.len(),
                actual: values.len(),
            });
        }

        let key = normalize_key(entity.key());
        if let Some(key_value) = key.as_ref() {
            let identity = (descriptor.table, key_fingerprint(key_value));
            if let Some(existing) = self.identity.get(&identity).copied() {
                if let Some(entry) = self.entries.get_mut(&existing) {
                    entry.values = values;
                    return Ok(existing);
                }
            }
        }

        let id = EntryId(self.next_entry);
        self.next_entry += 1;
        if let Some(key_value) = key.as_ref() {
            self.identity
                .insert((descriptor.table, key_fingerprint(key_value)), id);
        }
        self.entries.insert(
            id,
            TrackedEntry {
                descriptor,
                key,
                values,
                state: EntityState::Unchanged,
                marked_at: 0,
            },
        );
        Ok(id)
    }

    /// Requests `transition` for a tracked entry.
    pub fn mark(&mut self, entry: EntryId, transition: StateTransition) -> SessionResult<()> {
        let seq = self.next_mark;
        let tracked = self
            .entries
            .get_mut(&entry)
            .ok_or(SessionError::UnknownEntry(entry))?;
        if transition != StateTransition::Added && tracked.key.is_none() {
            return Err(SessionError::MissingKey {
                table: tracked.descriptor.table,
            });
        }
        tracked.state = transition.into();
        tracked.marked_at = seq;
        self.next_mark += 1;
        Ok(())
    }

    /// Attaches and marks in one step, rejecting keyless modify/delete before
    /// anything is tracked.
    pub fn track<T: Entity>(
        &mut self,
        entity: &T,
        transition: StateTransition,
    ) -> SessionResult<EntryId> {
        if transition != StateTransition::Added && normalize_key(entity.key()).is_none() {
            return Err(SessionError::MissingKey { table: T::TABLE });
        }
        let entry = self.attach(entity)?;
        self.mark(entry, transition)?;
        Ok(entry)
    }

    /// Returns `Detached` for entries this session no longer tracks.
    pub fn state_of(&self, entry: EntryId) -> EntityState {
        self.entries
            .get(&entry)
            .map_or(EntityState::Detached, |tracked| tracked.state)
    }

    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.is_pending()).count()
    }

    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    /// Drops every pending mark. Added entries are detached, Modified and
    /// Deleted entries fall back to Unchanged. Returns the number discarded.
    pub fn reject_changes(&mut self) -> usize {
        let mut discarded = 0;
        let mut detached = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            match entry.state {
                EntityState::Added => {
                    detached.push(*id);
                    discarded += 1;
                }
                EntityState::Modified | EntityState::Deleted => {
                    entry.state = EntityState::Unchanged;
                    discarded += 1;
                }
                EntityState::Unchanged | EntityState::Detached => {}
            }
        }
        for id in detached {
            self.forget(id);
        }
        discarded
    }

    /// Stops tracking `entry` unless it still carries a pending mark.
    ///
    /// Returns `false` for unknown or pending entries.
    pub fn detach(&mut self, entry: EntryId) -> bool {
        match self.entries.get(&entry) {
            Some(tracked) if !tracked.is_pending() => {
                self.forget(entry);
                true
            }
            _ => false,
        }
    }

    /// Drops every entry that has no pending mark. Returns the number dropped.
    pub fn clear(&mut self) -> usize {
        let settled: Vec<EntryId> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_pending())
            .map(|(id, _)| *id)
            .collect();
        for id in &settled {
            self.forget(*id);
        }
        settled.len()
    }

    /// Persists every pending transition in one immediate transaction.
    ///
    /// # Errors
    /// - `SessionError::Commit` when any statement or the final commit fails;
    ///   the transaction is rolled back and tracked states stay as they were.
    pub fn commit(&mut self) -> SessionResult<CommitOutcome> {
        let started_at = Instant::now();
        let mut ordered: Vec<(u64, EntryId)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_pending())
            .map(|(id, entry)| (entry.marked_at, *id))
            .collect();
        if ordered.is_empty() {
            return Ok(CommitOutcome::default());
        }
        ordered.sort_unstable();
        let pending: Vec<EntryId> = ordered.into_iter().map(|(_, id)| id).collect();

        match apply_pending(&mut self.conn, &self.entries, &pending) {
            Ok(outcome) => {
                self.settle(&outcome, &pending);
                debug!(
                    "event=commit module=session status=ok session={} pending={} affected={} duration_ms={}",
                    self.id,
                    pending.len(),
                    outcome.affected,
                    started_at.elapsed().as_millis()
                );
                Ok(outcome)
            }
            Err(source) => {
                error!(
                    "event=commit module=session status=error session={} pending={} duration_ms={} error_code=commit_failed error={}",
                    self.id,
                    pending.len(),
                    started_at.elapsed().as_millis(),
                    source
                );
                Err(SessionError::Commit {
                    pending: pending.len(),
                    source,
                })
            }
        }
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Runs `read` inside a deferred transaction so every statement sees one
    /// snapshot of the store.
    pub(crate) fn read_snapshot<R, E: From<rusqlite::Error>>(
        &mut self,
        read: impl FnOnce(&Connection) -> Result<R, E>,
    ) -> Result<R, E> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)?;
        let result = read(&*tx)?;
        tx.commit()?;
        Ok(result)
    }

    fn settle(&mut self, outcome: &CommitOutcome, committed: &[EntryId]) {
        for id in committed {
            let Some(state) = self.entries.get(id).map(|entry| entry.state) else {
                continue;
            };
            match state {
                EntityState::Added | EntityState::Modified => {
                    if let Some(entry) = self.entries.get_mut(id) {
                        if let Some(rowid) = outcome.assigned_key(*id) {
                            let key = Value::Integer(rowid);
                            self.identity
                                .insert((entry.descriptor.table, key_fingerprint(&key)), *id);
                            entry.key = Some(key);
                        }
                        entry.state = EntityState::Unchanged;
                    }
                }
                EntityState::Deleted => self.forget(*id),
                EntityState::Unchanged | EntityState::Detached => {}
            }
        }
    }

    fn forget(&mut self, id: EntryId) {
        if let Some(entry) = self.entries.remove(&id) {
            if let Some(key) = entry.key.as_ref() {
                self.identity
                    .remove(&(entry.descriptor.table, key_fingerprint(key)));
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let pending = self.pending_count();
        if pending > 0 {
            info!(
                "event=session_close module=session status=discarded session={} scope={} pending={}",
                self.id, self.scope, pending
            );
        } else {
            debug!(
                "event=session_close module=session status=ok session={} scope={}",
                self.id, self.scope
            );
        }
    }
}

fn apply_pending(
    conn: &mut Connection,
    entries: &BTreeMap<EntryId, TrackedEntry>,
    pending: &[EntryId],
) -> rusqlite::Result<CommitOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut outcome = CommitOutcome::default();

    for id in pending {
        let Some(entry) = entries.get(id) else {
            continue;
        };
        let affected = apply_entry(&tx, entry)?;
        outcome.affected += affected;
        outcome.affected_by_entry.insert(*id, affected);
        if entry.state == EntityState::Added && entry.key.is_none() {
            outcome.assigned_keys.insert(*id, tx.last_insert_rowid());
        }
    }

    tx.commit()?;
    Ok(outcome)
}

fn apply_entry(tx: &Transaction<'_>, entry: &TrackedEntry) -> rusqlite::Result<usize> {
    let descriptor = &entry.descriptor;
    let table = quote_ident(descriptor.table);
    let key_column = quote_ident(descriptor.key_column);

    match entry.state {
        EntityState::Added => {
            let mut columns = Vec::with_capacity(descriptor.columns.len() + 1);
            let mut values = Vec::with_capacity(descriptor.columns.len() + 1);
            if let Some(key) = entry.key.as_ref() {
                columns.push(key_column);
                values.push(key.clone());
            }
            columns.extend(descriptor.columns.iter().map(|column| quote_ident(column)));
            values.extend(entry.values.iter().cloned());

            if columns.is_empty() {
                return tx.execute(&format!("INSERT INTO {table} DEFAULT VALUES;"), []);
            }
            let sql = format!(
                "INSERT INTO {table} ({}) VALUES ({});",
                columns.join(", "),
                placeholders(1, values.len())
            );
            tx.execute(&sql, params_from_iter(values))
        }
        EntityState::Modified => {
            let Some(key) = entry.key.as_ref() else {
                return Ok(0);
            };
            let assignments = if descriptor.columns.is_empty() {
                format!("{key_column} = {key_column}")
            } else {
                descriptor
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(index, column)| format!("{} = ?{}", quote_ident(column), index + 1))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let sql = format!(
                "UPDATE {table} SET {assignments} WHERE {key_column} = ?{};",
                descriptor.columns.len() + 1
            );
            let binds = entry.values.iter().cloned().chain(std::iter::once(key.clone()));
            tx.execute(&sql, params_from_iter(binds))
        }
        EntityState::Deleted => {
            let Some(key) = entry.key.as_ref() else {
                return Ok(0);
            };
            tx.execute(
                &format!("DELETE FROM {table} WHERE {key_column} = ?1;"),
                [key],
            )
        }
        EntityState::Unchanged | EntityState::Detached => Ok(0),
    }
}

fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn normalize_key(key: Option<Value>) -> Option<Value> {
    key.filter(|value| !matches!(value, Value::Null))
}

fn key_fingerprint(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Integer(number) => format!("i:{number}"),
        Value::Real(number) => format!("r:{number}"),
        Value::Text(text) => format!("t:{text}"),
        Value::Blob(bytes) => format!("b:{bytes:?}"),
    }
}

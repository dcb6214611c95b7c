//! Entity contract between caller-defined record types and the session layer.
//!
//! # Responsibility
//! - Describe how one Rust type maps onto one table row.
//! - Define entity tracking states and the transitions a caller can request.
//!
//! # Invariants
//! - Table and column names are plain SQL identifiers
//!   (`^[A-Za-z_][A-Za-z0-9_]*$`) and are always emitted quoted.
//! - `column_values()` yields exactly one value per entry of `COLUMNS`, in order.
//! - The key column is never listed in `COLUMNS`.

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern must compile")
});

/// A persistable record type.
///
/// Implementors describe their table shape with associated constants and
/// convert themselves to and from rows. The session layer never inspects the
/// type beyond this contract. Entities own their data, so queries may hold
/// boxed predicates over them for as long as the repository lives.
pub trait Entity: Sized + 'static {
    /// Table holding one row per entity.
    const TABLE: &'static str;
    /// Identity column. Usually `INTEGER PRIMARY KEY` so SQLite can assign it.
    const KEY_COLUMN: &'static str;
    /// Every non-key column, in the order `column_values()` yields them.
    const COLUMNS: &'static [&'static str];

    /// Current identity, or `None` when the store should assign one on insert.
    fn key(&self) -> Option<Value>;

    /// Receives the rowid SQLite assigned to a keyless insert.
    fn assign_key(&mut self, rowid: i64) {
        let _ = rowid;
    }

    /// Full row image in `COLUMNS` order.
    fn column_values(&self) -> Vec<Value>;

    /// Rebuilds an entity from a row selected with [`EntityDescriptor::select_list`].
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Tracking state of one entity inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Tracked and in sync with the last commit.
    Unchanged,
    /// Will be inserted by the next commit.
    Added,
    /// Will be fully overwritten by the next commit.
    Modified,
    /// Will be removed by the next commit.
    Deleted,
    /// Not tracked by the session.
    Detached,
}

/// State change a caller can request before commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateTransition {
    Added,
    Modified,
    Deleted,
}

impl From<StateTransition> for EntityState {
    fn from(value: StateTransition) -> Self {
        match value {
            StateTransition::Added => Self::Added,
            StateTransition::Modified => Self::Modified,
            StateTransition::Deleted => Self::Deleted,
        }
    }
}

/// Entity shape rejected by [`EntityDescriptor::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorError {
    pub table: &'static str,
    pub reason: String,
}

impl Display for DescriptorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid entity mapping for `{}`: {}", self.table, self.reason)
    }
}

impl Error for DescriptorError {}

/// Where a named column lives in an entity's row image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSlot {
    Key,
    Column(usize),
}

/// Type-erased copy of an [`Entity`] mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub table: &'static str,
    pub key_column: &'static str,
    pub columns: &'static [&'static str],
}

impl EntityDescriptor {
    pub fn of<T: Entity>() -> Self {
        Self {
            table: T::TABLE,
            key_column: T::KEY_COLUMN,
            columns: T::COLUMNS,
        }
    }

    /// Checks identifiers and column uniqueness.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        let reject = |reason: String| DescriptorError {
            table: self.table,
            reason,
        };

        for name in std::iter::once(&self.table)
            .chain(std::iter::once(&self.key_column))
            .chain(self.columns.iter())
        {
            if !is_valid_identifier(name) {
                return Err(reject(format!("`{name}` is not a plain SQL identifier")));
            }
        }

        let mut seen = BTreeSet::new();
        seen.insert(self.key_column.to_ascii_lowercase());
        for column in self.columns {
            if !seen.insert(column.to_ascii_lowercase()) {
                return Err(reject(format!("column `{column}` is declared twice")));
            }
        }

        Ok(())
    }

    pub fn slot_of(&self, column: &str) -> Option<ColumnSlot> {
        if column.eq_ignore_ascii_case(self.key_column) {
            return Some(ColumnSlot::Key);
        }
        self.columns
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(column))
            .map(ColumnSlot::Column)
    }

    /// Quoted `key, col1, col2, ...` list used by every entity select.
    pub fn select_list(&self) -> String {
        std::iter::once(self.key_column)
            .chain(self.columns.iter().copied())
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

/// Wraps an already validated identifier in double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

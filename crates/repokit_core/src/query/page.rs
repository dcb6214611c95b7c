//! Paging request/result shapes and sort ordering.
//!
//! # Invariants
//! - `page_index` is 1-based; page 1 skips nothing.
//! - Every ordering ends with the key column ascending, so equal sort values
//!   page deterministically.
//! - In-memory ordering matches SQLite: NULL < numbers < text < blob.

use super::filter::resolve;
use super::{Filter, QueryError};
use crate::model::entity::{quote_ident, ColumnSlot, Entity, EntityDescriptor};
use rusqlite::types::Value;
use serde::Serialize;
use std::cmp::Ordering;

/// Column a page is ordered by.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SortKey {
    /// The entity key column.
    #[default]
    Key,
    Column(String),
}

impl SortKey {
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    /// `ORDER BY` body: the sort column in the requested direction, then the
    /// key ascending.
    pub(crate) fn order_by_sql(
        &self,
        descriptor: &EntityDescriptor,
        ascending: bool,
    ) -> Result<String, QueryError> {
        let key_column = quote_ident(descriptor.key_column);
        let direction = if ascending { "ASC" } else { "DESC" };
        let primary = match self {
            Self::Key => key_column.clone(),
            Self::Column(name) => resolve(descriptor, name)?,
        };
        Ok(format!("{primary} {direction}, {key_column} ASC"))
    }

    pub(crate) fn slot(&self, descriptor: &EntityDescriptor) -> Result<ColumnSlot, QueryError> {
        match self {
            Self::Key => Ok(ColumnSlot::Key),
            Self::Column(name) => descriptor.slot_of(name).ok_or_else(|| QueryError::UnknownColumn {
                table: descriptor.table,
                column: name.clone(),
            }),
        }
    }
}

/// One page of a filtered, ordered entity set.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// 1-based page number.
    pub page_index: u32,
    pub page_size: u32,
    pub filter: Filter,
    pub sort: SortKey,
    pub ascending: bool,
}

impl PageRequest {
    /// Unfiltered request ordered by key ascending.
    pub fn new(page_index: u32, page_size: u32) -> Self {
        Self {
            page_index,
            page_size,
            filter: Filter::All,
            sort: SortKey::Key,
            ascending: true,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, sort: SortKey, ascending: bool) -> Self {
        self.sort = sort;
        self.ascending = ascending;
        self
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.page_index == 0 || self.page_size == 0 {
            return Err(QueryError::InvalidPageRequest {
                page_index: self.page_index,
                page_size: self.page_size,
            });
        }
        Ok(())
    }

    /// Rows skipped before this page: `page_size * (page_index - 1)`.
    pub fn offset(&self) -> u64 {
        u64::from(self.page_size) * u64::from(self.page_index.saturating_sub(1))
    }
}

/// Page items plus the size of the whole filtered set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    /// Count of rows matching the filter, independent of paging.
    pub total: u64,
    pub page_index: u32,
    pub page_size: u32,
}

impl<T> PageResult<T> {
    pub fn page_count(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.page_size))
    }

    pub fn has_next_page(&self) -> bool {
        u64::from(self.page_index) < self.page_count()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Orders entities in memory exactly like `order_by_sql` orders rows.
pub(crate) fn sort_entities<T: Entity>(
    entities: Vec<T>,
    slot: ColumnSlot,
    ascending: bool,
) -> Vec<T> {
    let mut keyed: Vec<(Value, Value, T)> = entities
        .into_iter()
        .map(|entity| {
            let key = entity.key().unwrap_or(Value::Null);
            let sort_value = match slot {
                ColumnSlot::Key => key.clone(),
                ColumnSlot::Column(index) => entity
                    .column_values()
                    .into_iter()
                    .nth(index)
                    .unwrap_or(Value::Null),
            };
            (sort_value, key, entity)
        })
        .collect();

    keyed.sort_by(|(left_value, left_key, _), (right_value, right_key, _)| {
        let primary = compare_values(left_value, right_value);
        let primary = if ascending { primary } else { primary.reverse() };
        primary.then_with(|| compare_values(left_key, right_key))
    });

    keyed.into_iter().map(|(_, _, entity)| entity).collect()
}

/// SQLite's cross-type ordering under the BINARY collation.
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    fn class(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Integer(_) | Value::Real(_) => 1,
            Value::Text(_) => 2,
            Value::Blob(_) => 3,
        }
    }

    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
        (Value::Integer(a), Value::Real(b)) => (*a as f64).total_cmp(b),
        (Value::Real(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
        (Value::Real(a), Value::Real(b)) => a.total_cmp(b),
        (Value::Text(a), Value::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
        (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
        _ => class(left).cmp(&class(right)),
    }
}

#[cfg(test)]
mod tests {
    use super::{compare_values, PageRequest, PageResult, SortKey};
    use crate::model::entity::EntityDescriptor;
    use crate::query::QueryError;
    use rusqlite::types::Value;
    use std::cmp::Ordering;

    const ORDERS: EntityDescriptor = EntityDescriptor {
        table: "orders",
        key_column: "id",
        columns: &["status", "total"],
    };

    #[test]
    fn offset_is_one_based() {
        assert_eq!(PageRequest::new(1, 10).offset(), 0);
        assert_eq!(PageRequest::new(3, 10).offset(), 20);
    }

    #[test]
    fn validate_rejects_zero_index_or_size() {
        assert!(PageRequest::new(1, 1).validate().is_ok());
        assert_eq!(
            PageRequest::new(0, 10).validate(),
            Err(QueryError::InvalidPageRequest {
                page_index: 0,
                page_size: 10
            })
        );
        assert!(PageRequest::new(2, 0).validate().is_err());
    }

    #[test]
    fn order_by_always_appends_key_tiebreak() {
        let sql = SortKey::column("total")
            .order_by_sql(&ORDERS, false)
            .unwrap();
        assert_eq!(sql, "\"total\" DESC, \"id\" ASC");

        let sql = SortKey::Key.order_by_sql(&ORDERS, true).unwrap();
        assert_eq!(sql, "\"id\" ASC, \"id\" ASC");

        assert!(SortKey::column("missing").order_by_sql(&ORDERS, true).is_err());
    }

    #[test]
    fn page_count_rounds_up() {
        let page = PageResult::<u8> {
            items: vec![],
            total: 25,
            page_index: 3,
            page_size: 10,
        };
        assert_eq!(page.page_count(), 3);
        assert!(!page.has_next_page());
    }

    #[test]
    fn compare_values_follows_sqlite_type_order() {
        assert_eq!(
            compare_values(&Value::Null, &Value::Integer(-5)),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::Integer(2), &Value::Real(1.5)),
            Ordering::Greater
        );
        assert_eq!(
            compare_values(&Value::Real(9.0), &Value::Text("1".to_string())),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::Text("b".to_string()), &Value::Blob(vec![0])),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::Text("B".to_string()), &Value::Text("a".to_string())),
            Ordering::Less
        );
    }
}

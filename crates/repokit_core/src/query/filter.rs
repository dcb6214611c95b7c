//! Filter expressions and their SQL translation.
//!
//! # Invariants
//! - `Filter::All` and an empty `And` match every row; an empty `Or` or an
//!   empty `In` match none.
//! - `Eq`/`NotEq` against NULL translate to `IS NULL`/`IS NOT NULL`; ordering
//!   comparisons against NULL match nothing, as in SQL.

use super::QueryError;
use crate::model::entity::{quote_ident, EntityDescriptor};
use rusqlite::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

/// Declarative row predicate.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    #[default]
    All,
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    /// Inclusive range.
    Between {
        column: String,
        low: Value,
        high: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    IsNull {
        column: String,
    },
    /// SQLite `LIKE`: `%`/`_` wildcards, ASCII case-insensitive.
    Like {
        column: String,
        pattern: String,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::NotEq, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::LtEq, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::GtEq, value)
    }

    pub fn between(
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Self::Between {
            column: column.into(),
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn is_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull {
            column: column.into(),
        }
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            column: column.into(),
            pattern: pattern.into(),
        }
    }

    /// Conjunction; nested `And`s are flattened.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::All => other,
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Disjunction; nested `Or`s are flattened.
    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut parts) => {
                parts.push(other);
                Self::Or(parts)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Renders a `WHERE` body with `?` placeholders, appending bound values to
    /// `binds` in placeholder order.
    pub(crate) fn to_sql(
        &self,
        descriptor: &EntityDescriptor,
        binds: &mut Vec<Value>,
    ) -> Result<String, QueryError> {
        match self {
            Self::All => Ok("1 = 1".to_string()),
            Self::Compare { column, op, value } => {
                let column = resolve(descriptor, column)?;
                match (op, value) {
                    (CompareOp::Eq, Value::Null) => Ok(format!("{column} IS NULL")),
                    (CompareOp::NotEq, Value::Null) => Ok(format!("{column} IS NOT NULL")),
                    _ => {
                        binds.push(value.clone());
                        Ok(format!("{column} {} ?", op.sql()))
                    }
                }
            }
            Self::Between { column, low, high } => {
                let column = resolve(descriptor, column)?;
                binds.push(low.clone());
                binds.push(high.clone());
                Ok(format!("{column} BETWEEN ? AND ?"))
            }
            Self::In { column, values } => {
                let column = resolve(descriptor, column)?;
                if values.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                binds.extend(values.iter().cloned());
                let slots = vec!["?"; values.len()].join(", ");
                Ok(format!("{column} IN ({slots})"))
            }
            Self::IsNull { column } => Ok(format!("{} IS NULL", resolve(descriptor, column)?)),
            Self::Like { column, pattern } => {
                let column = resolve(descriptor, column)?;
                binds.push(Value::Text(pattern.clone()));
                Ok(format!("{column} LIKE ?"))
            }
            Self::And(parts) => join(parts, " AND ", "1 = 1", descriptor, binds),
            Self::Or(parts) => join(parts, " OR ", "1 = 0", descriptor, binds),
            Self::Not(inner) => Ok(format!("NOT ({})", inner.to_sql(descriptor, binds)?)),
        }
    }
}

fn join(
    parts: &[Filter],
    separator: &str,
    empty: &str,
    descriptor: &EntityDescriptor,
    binds: &mut Vec<Value>,
) -> Result<String, QueryError> {
    if parts.is_empty() {
        return Ok(empty.to_string());
    }
    let rendered = parts
        .iter()
        .map(|part| part.to_sql(descriptor, binds))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", rendered.join(separator)))
}

/// Maps a caller column name onto the canonical, quoted mapped name.
pub(crate) fn resolve(descriptor: &EntityDescriptor, column: &str) -> Result<String, QueryError> {
    use crate::model::entity::ColumnSlot;

    match descriptor.slot_of(column) {
        Some(ColumnSlot::Key) => Ok(quote_ident(descriptor.key_column)),
        Some(ColumnSlot::Column(index)) => Ok(quote_ident(descriptor.columns[index])),
        None => Err(QueryError::UnknownColumn {
            table: descriptor.table,
            column: column.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::Filter;
    use crate::model::entity::EntityDescriptor;
    use crate::query::QueryError;
    use rusqlite::types::Value;

    const ORDERS: EntityDescriptor = EntityDescriptor {
        table: "orders",
        key_column: "id",
        columns: &["status", "total", "note"],
    };

    fn render(filter: &Filter) -> (String, Vec<Value>) {
        let mut binds = Vec::new();
        let sql = filter.to_sql(&ORDERS, &mut binds).unwrap();
        (sql, binds)
    }

    #[test]
    fn renders_nested_expression_with_binds_in_order() {
        let filter = Filter::eq("status", "open".to_string())
            .and(Filter::between("total", 10_i64, 20_i64).or(Filter::is_null("note")));
        let (sql, binds) = render(&filter);

        assert_eq!(
            sql,
            "(\"status\" = ? AND (\"total\" BETWEEN ? AND ? OR \"note\" IS NULL))"
        );
        assert_eq!(
            binds,
            vec![
                Value::Text("open".to_string()),
                Value::Integer(10),
                Value::Integer(20)
            ]
        );
    }

    #[test]
    fn null_equality_uses_is_null() {
        let (sql, binds) = render(&Filter::eq("note", Value::Null));
        assert_eq!(sql, "\"note\" IS NULL");
        assert!(binds.is_empty());

        let (sql, _) = render(&Filter::ne("note", Value::Null));
        assert_eq!(sql, "\"note\" IS NOT NULL");
    }

    #[test]
    fn empty_collections_have_fixed_truth_values() {
        assert_eq!(render(&Filter::And(vec![])).0, "1 = 1");
        assert_eq!(render(&Filter::Or(vec![])).0, "1 = 0");
        assert_eq!(render(&Filter::is_in("id", Vec::<i64>::new())).0, "1 = 0");
    }

    #[test]
    fn in_and_not_render_placeholders() {
        let (sql, binds) = render(&Filter::is_in("id", [1_i64, 2, 3]).negate());
        assert_eq!(sql, "NOT (\"id\" IN (?, ?, ?))");
        assert_eq!(binds.len(), 3);
    }

    #[test]
    fn column_names_resolve_case_insensitively_and_unknown_is_rejected() {
        let (sql, _) = render(&Filter::gt("TOTAL", 5_i64));
        assert_eq!(sql, "\"total\" > ?");

        let mut binds = Vec::new();
        let err = Filter::eq("total; --", 1_i64)
            .to_sql(&ORDERS, &mut binds)
            .unwrap_err();
        assert_eq!(
            err,
            QueryError::UnknownColumn {
                table: "orders",
                column: "total; --".to_string()
            }
        );
    }

    #[test]
    fn and_starting_from_all_collapses() {
        let filter = Filter::All.and(Filter::eq("status", "x".to_string()));
        assert_eq!(filter, Filter::eq("status", "x".to_string()));
    }
}

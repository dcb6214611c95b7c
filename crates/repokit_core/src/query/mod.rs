//! Declarative filters, sort keys and page shapes.
//!
//! # Responsibility
//! - Express predicates as a small sum type that translates to SQL `WHERE`.
//! - Describe paging requests and results independent of any entity type.
//!
//! # Invariants
//! - Column names are resolved against the entity mapping before any SQL is built.
//! - Values are always bound as parameters, never spliced into SQL text.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod filter;
pub mod page;

pub use filter::{CompareOp, Filter};
pub use page::{PageRequest, PageResult, SortKey};

/// Query construction failures. All of them are caller contract violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// A filter or sort key names a column the entity does not map.
    UnknownColumn { table: &'static str, column: String },
    /// `page_index` and `page_size` must both be at least 1.
    InvalidPageRequest { page_index: u32, page_size: u32 },
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownColumn { table, column } => {
                write!(f, "column `{column}` is not mapped by entity table `{table}`")
            }
            Self::InvalidPageRequest {
                page_index,
                page_size,
            } => write!(
                f,
                "invalid page request: page_index={page_index} page_size={page_size}; both must be >= 1"
            ),
        }
    }
}

impl Error for QueryError {}

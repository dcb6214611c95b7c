#![allow(dead_code)]

use repokit_core::{Entity, SessionRegistry, Store, StoreConfig};
use rusqlite::types::Value;
use rusqlite::Row;
use std::path::Path;

pub const CUSTOMERS_SCHEMA: &str = "
CREATE TABLE customers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    city TEXT,
    credit INTEGER NOT NULL DEFAULT 0 CHECK (credit >= 0)
);";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub id: Option<i64>,
    pub name: String,
    pub city: Option<String>,
    pub credit: i64,
}

impl Customer {
    pub fn new(name: &str, city: Option<&str>, credit: i64) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            city: city.map(str::to_string),
            credit,
        }
    }
}

impl Entity for Customer {
    const TABLE: &'static str = "customers";
    const KEY_COLUMN: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &["name", "city", "credit"];

    fn key(&self) -> Option<Value> {
        self.id.map(Value::Integer)
    }

    fn assign_key(&mut self, rowid: i64) {
        self.id = Some(rowid);
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.name.clone()),
            self.city.clone().map_or(Value::Null, Value::Text),
            Value::Integer(self.credit),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            city: row.get(2)?,
            credit: row.get(3)?,
        })
    }
}

/// Registry over a private in-memory store with the customers table.
pub fn memory_registry() -> SessionRegistry {
    let store = Store::open_in_memory().unwrap();
    store.apply_schema(CUSTOMERS_SCHEMA).unwrap();
    SessionRegistry::new(store)
}

/// Registry over a database file with the customers table.
pub fn file_registry(path: &Path) -> SessionRegistry {
    let store = Store::open(StoreConfig::file(path)).unwrap();
    store.apply_schema(CUSTOMERS_SCHEMA).unwrap();
    SessionRegistry::new(store)
}

/// Reads a row through a connection of its own, bypassing every session.
pub fn raw_customer(registry: &SessionRegistry, id: i64) -> Option<Customer> {
    let conn = registry.store().connect().unwrap();
    let mut stmt = conn
        .prepare("SELECT id, name, city, credit FROM customers WHERE id = ?1;")
        .unwrap();
    let mut rows = stmt.query([id]).unwrap();
    let found = rows.next().unwrap().map(|row| Customer::from_row(row).unwrap());
    found
}

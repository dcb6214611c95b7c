//! CLI smoke entry point.
//!
//! # Responsibility
//! - Exercise `repokit_core` end to end against the store named by the
//!   environment (`REPOKIT_DATABASE`, default in-memory).
//! - Keep output deterministic for quick local sanity checks.

use log::info;
use repokit_core::{
    Entity, Filter, PageRequest, Repository, SessionRegistry, SessionRepository, SortKey,
    StoreConfig,
};
use rusqlite::types::Value;
use rusqlite::Row;
use std::error::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS smoke_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL,
    weight INTEGER NOT NULL
);";

#[derive(Debug, Clone)]
struct SmokeItem {
    id: Option<i64>,
    label: String,
    weight: i64,
}

impl Entity for SmokeItem {
    const TABLE: &'static str = "smoke_items";
    const KEY_COLUMN: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &["label", "weight"];

    fn key(&self) -> Option<Value> {
        self.id.map(Value::Integer)
    }

    fn assign_key(&mut self, rowid: i64) {
        self.id = Some(rowid);
    }

    fn column_values(&self) -> Vec<Value> {
        vec![Value::Text(self.label.clone()), Value::Integer(self.weight)]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            label: row.get(1)?,
            weight: row.get(2)?,
        })
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("repokit_core ping={}", repokit_core::ping());
    println!("repokit_core version={}", repokit_core::core_version());

    if let Ok(log_dir) = std::env::var("REPOKIT_LOG_DIR") {
        repokit_core::init_logging(repokit_core::default_log_level(), log_dir)?;
    }

    let registry = SessionRegistry::open(StoreConfig::from_env()?)?;
    registry.store().apply_schema(SCHEMA)?;

    let scope = registry.begin_scope();
    let repo = SessionRepository::<SmokeItem>::try_new(&registry, scope)?;

    let mut item = repo.add_entity(SmokeItem {
        id: None,
        label: "smoke".to_string(),
        weight: 1,
    })?;
    item.weight = 2;
    let updated = repo.update_entity(&item)?;

    let page = repo.load_page_entities(
        &PageRequest::new(1, 10)
            .with_filter(Filter::eq("label", "smoke".to_string()))
            .order_by(SortKey::column("weight"), false),
    )?;
    let deleted = repo.delete_entity(&item)?;
    registry.end_scope(&scope);

    info!(
        "event=cli_smoke module=cli status=ok updated={} total={} deleted={}",
        updated, page.total, deleted
    );
    println!(
        "repokit_core smoke updated={} page_items={} total={} deleted={}",
        updated,
        page.items.len(),
        page.total,
        deleted
    );
    Ok(())
}

//! In-process store: one mutex over every table.
//! Used by tests and by embedders that keep dial lists in memory.

use std::collections::HashMap;
use std::sync::Mutex;

use outdial_core::error::{OutdialError, Result};
use outdial_core::record::{Filter, Record};
use outdial_core::traits::{CasOutcome, Store};

/// Tables of records kept in insertion order.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tables<T>(&self, f: impl FnOnce(&mut HashMap<String, Vec<Record>>) -> Result<T>) -> Result<T> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|e| OutdialError::Persistence(format!("Lock: {e}")))?;
        f(&mut tables)
    }
}

fn row_mut<'a>(tables: &'a mut HashMap<String, Vec<Record>>, table: &str, id: &str) -> Result<&'a mut Record> {
    tables
        .get_mut(table)
        .and_then(|rows| rows.iter_mut().find(|r| r.get("uuid").and_then(|v| v.as_str()) == Some(id)))
        .ok_or_else(|| OutdialError::NotFound(format!("{table}/{id}")))
}

fn apply(row: &mut Record, fields: &Record) {
    for (k, v) in fields {
        if k != "uuid" {
            row.insert(k.clone(), v.clone());
        }
    }
}

impl Store for MemoryStore {
    fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Record>> {
        self.with_tables(|tables| {
            let Some(rows) = tables.get(table) else {
                return Ok(Vec::new());
            };
            let matching = rows.iter().filter(|r| filter.matches(r)).cloned();
            Ok(match filter.max_rows() {
                Some(n) => matching.take(n).collect(),
                None => matching.collect(),
            })
        })
    }

    fn update(&self, table: &str, id: &str, fields: &Record) -> Result<()> {
        self.with_tables(|tables| {
            apply(row_mut(tables, table, id)?, fields);
            Ok(())
        })
    }

    fn conditional_update(
        &self,
        table: &str,
        id: &str,
        expected: &Filter,
        fields: &Record,
    ) -> Result<CasOutcome> {
        self.with_tables(|tables| {
            let row = row_mut(tables, table, id)?;
            if !expected.matches(row) {
                return Ok(CasOutcome::Conflict);
            }
            apply(row, fields);
            Ok(CasOutcome::Applied)
        })
    }

    fn insert(&self, table: &str, record: &Record) -> Result<()> {
        let id = record
            .get("uuid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OutdialError::Validation(format!("insert into {table} without uuid")))?
            .to_string();
        self.with_tables(|tables| {
            let rows = tables.entry(table.to_string()).or_default();
            if rows.iter().any(|r| r.get("uuid").and_then(|v| v.as_str()) == Some(id.as_str())) {
                return Err(OutdialError::Duplicate(format!("{table}/{id}")));
            }
            rows.push(record.clone());
            Ok(())
        })
    }
}

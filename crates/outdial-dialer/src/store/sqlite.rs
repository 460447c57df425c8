//! SQLite-backed store for campaigns, dial plans and dial lists.
//! Each dial-list dataset is its own table, named by the master's `dl_table`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode, params_from_iter};
use serde_json::Value;

use outdial_core::config::OutdialConfig;
use outdial_core::error::{OutdialError, Result};
use outdial_core::record::{Condition, Filter, Record};
use outdial_core::traits::{CasOutcome, Store};
use outdial_core::types::SLOT_COUNT;

/// SQLite persistence for all dialer data.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the dialer database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| OutdialError::Persistence(format!("DB open: {e}")))?;
        // Readers should not block the dispatcher's writes.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    /// Open the database named by `config.database_path`.
    pub fn from_config(config: &OutdialConfig) -> Result<Self> {
        Self::open(Path::new(&config.database_path))
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| OutdialError::Persistence(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| OutdialError::Persistence(format!("Lock: {e}")))
    }

    /// Run migrations to create the fixed tables.
    fn migrate(&self) -> Result<()> {
        let plan_limits: String = (1..=SLOT_COUNT)
            .map(|i| format!("max_retry_cnt_{i} INTEGER NOT NULL DEFAULT 5,\n"))
            .collect();
        let sql = format!(
            "
            CREATE TABLE IF NOT EXISTS campaign (
                uuid TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                detail TEXT,
                status TEXT NOT NULL DEFAULT 'stopped',
                plan TEXT NOT NULL,
                dlma TEXT NOT NULL,
                queue TEXT,
                in_use INTEGER NOT NULL DEFAULT 1,
                tm_create TEXT,
                tm_update TEXT,
                tm_delete TEXT
            );

            CREATE TABLE IF NOT EXISTS plan (
                uuid TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                {plan_limits}
                in_use INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS dl_list_ma (
                uuid TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                detail TEXT,
                dl_table TEXT NOT NULL,
                in_use INTEGER NOT NULL DEFAULT 1,
                tm_create TEXT,
                tm_update TEXT,
                tm_delete TEXT
            );
            "
        );
        self.lock()?
            .execute_batch(&sql)
            .map_err(|e| OutdialError::Persistence(format!("Migration: {e}")))
    }

    /// Create the table backing a dial-list dataset (no-op if it exists).
    pub fn create_dial_list_table(&self, dl_table: &str) -> Result<()> {
        check_ident(dl_table)?;
        let slots: String = (1..=SLOT_COUNT)
            .map(|i| format!("number_{i} TEXT,\ntrycnt_{i} INTEGER NOT NULL DEFAULT 0,\n"))
            .collect();
        let sql = format!(
            "
            CREATE TABLE IF NOT EXISTS \"{dl_table}\" (
                uuid TEXT PRIMARY KEY,
                name TEXT,
                {slots}
                status TEXT NOT NULL DEFAULT 'idle',
                dialing_uuid TEXT,
                dialing_camp_uuid TEXT,
                dialing_plan_uuid TEXT,
                res_hangup INTEGER NOT NULL DEFAULT 0,
                tm_last_dial TEXT
            );
            CREATE INDEX IF NOT EXISTS \"idx_{dl_table}_status\" ON \"{dl_table}\"(status);
            CREATE INDEX IF NOT EXISTS \"idx_{dl_table}_camp\" ON \"{dl_table}\"(dialing_camp_uuid);
            "
        );
        self.lock()?
            .execute_batch(&sql)
            .map_err(|e| OutdialError::Persistence(format!("Create dial list {dl_table}: {e}")))?;
        tracing::info!("📋 Dial list table ready: {dl_table}");
        Ok(())
    }
}

impl Store for SqliteStore {
    fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Record>> {
        check_ident(table)?;
        let (clause, params) = where_clause(filter.conditions())?;
        let mut sql = format!("SELECT * FROM \"{table}\"");
        if !clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        sql.push_str(" ORDER BY rowid");
        if let Some(n) = filter.max_rows() {
            sql.push_str(&format!(" LIMIT {n}"));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let mut rec = Record::new();
                for (i, name) in names.iter().enumerate() {
                    rec.insert(name.clone(), from_sql(row.get_ref(i)?));
                }
                Ok(rec)
            })
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
    }

    fn update(&self, table: &str, id: &str, fields: &Record) -> Result<()> {
        let conn = self.lock()?;
        let changed = update_where(&conn, table, id, &[], fields)?;
        if changed == 0 && !row_exists(&conn, table, id)? {
            return Err(OutdialError::NotFound(format!("{table}/{id}")));
        }
        Ok(())
    }

    fn conditional_update(
        &self,
        table: &str,
        id: &str,
        expected: &Filter,
        fields: &Record,
    ) -> Result<CasOutcome> {
        // A single UPDATE ... WHERE is atomic; the mutex keeps the follow-up
        // existence check on the same view.
        let conn = self.lock()?;
        if update_where(&conn, table, id, expected.conditions(), fields)? > 0 {
            return Ok(CasOutcome::Applied);
        }
        if row_exists(&conn, table, id)? {
            Ok(CasOutcome::Conflict)
        } else {
            Err(OutdialError::NotFound(format!("{table}/{id}")))
        }
    }

    fn insert(&self, table: &str, record: &Record) -> Result<()> {
        check_ident(table)?;
        if record.is_empty() {
            return Err(OutdialError::Validation(format!("empty insert into {table}")));
        }
        let mut columns = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());
        for (k, v) in record {
            check_ident(k)?;
            columns.push(format!("\"{k}\""));
            values.push(to_sql(v));
        }
        let marks = vec!["?"; columns.len()].join(", ");
        let sql = format!("INSERT INTO \"{table}\" ({}) VALUES ({marks})", columns.join(", "));

        let conn = self.lock()?;
        match conn.execute(&sql, params_from_iter(values.iter())) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(OutdialError::Duplicate(format!("{table}: {e}")))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    fn ensure_dataset(&self, dataset: &str) -> Result<()> {
        self.create_dial_list_table(dataset)
    }
}

// ─── SQL helpers ──────────────────────────────────────────

fn db_err(e: rusqlite::Error) -> OutdialError {
    OutdialError::Persistence(e.to_string())
}

/// Table and column names are interpolated, so only plain identifiers pass.
fn check_ident(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(OutdialError::Validation(format!("invalid identifier '{name}'")))
    }
}

fn where_clause(conditions: &[Condition]) -> Result<(String, Vec<SqlValue>)> {
    let mut parts = Vec::with_capacity(conditions.len());
    let mut params = Vec::new();
    for cond in conditions {
        check_ident(cond.field())?;
        match cond {
            Condition::Eq(f, v) => {
                parts.push(format!("\"{f}\" = ?"));
                params.push(to_sql(v));
            }
            Condition::Ne(f, v) => {
                parts.push(format!("\"{f}\" != ?"));
                params.push(to_sql(v));
            }
            Condition::IsNull(f) => parts.push(format!("\"{f}\" IS NULL")),
        }
    }
    Ok((parts.join(" AND "), params))
}

fn update_where(
    conn: &Connection,
    table: &str,
    id: &str,
    conditions: &[Condition],
    fields: &Record,
) -> Result<usize> {
    check_ident(table)?;
    let mut sets = Vec::new();
    let mut params = Vec::new();
    for (k, v) in fields.iter().filter(|(k, _)| k.as_str() != "uuid") {
        check_ident(k)?;
        sets.push(format!("\"{k}\" = ?"));
        params.push(to_sql(v));
    }
    if sets.is_empty() {
        // Nothing to write; still honour the condition.
        sets.push("uuid = uuid".to_string());
    }
    let (clause, cond_params) = where_clause(conditions)?;
    let mut sql = format!("UPDATE \"{table}\" SET {} WHERE uuid = ?", sets.join(", "));
    params.push(SqlValue::Text(id.to_string()));
    if !clause.is_empty() {
        sql.push_str(" AND ");
        sql.push_str(&clause);
        params.extend(cond_params);
    }
    conn.execute(&sql, params_from_iter(params.iter())).map_err(db_err)
}

fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM \"{table}\" WHERE uuid = ?1"),
            [id],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    Ok(count > 0)
}

fn to_sql(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

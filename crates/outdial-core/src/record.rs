//! Loosely-typed store records and the filters used to query them.
//!
//! Every store speaks `Record` (a JSON object keyed by column name). Typed
//! models in [`crate::types`] convert to and from records and validate the
//! required fields on the way in.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{OutdialError, Result};

/// One row as seen by a store.
pub type Record = serde_json::Map<String, Value>;

/// A single predicate on a record field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    /// SQL semantics: a null field never satisfies `Ne`.
    Ne(String, Value),
    IsNull(String),
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Condition::Eq(f, _) | Condition::Ne(f, _) | Condition::IsNull(f) => f,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        let value = record.get(self.field()).unwrap_or(&Value::Null);
        match self {
            Condition::Eq(_, expected) => values_equal(value, expected),
            Condition::Ne(_, expected) => !value.is_null() && !values_equal(value, expected),
            Condition::IsNull(_) => value.is_null(),
        }
    }
}

/// Conjunction of conditions plus an optional row limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
    limit: Option<usize>,
}

impl Filter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if value.is_null() {
            self.conditions.push(Condition::IsNull(field.to_string()));
        } else {
            self.conditions.push(Condition::Eq(field.to_string(), value));
        }
        self
    }

    pub fn ne(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Ne(field.to_string(), value.into()));
        self
    }

    pub fn is_null(mut self, field: &str) -> Self {
        self.conditions.push(Condition::IsNull(field.to_string()));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn max_rows(&self) -> Option<usize> {
        self.limit
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }
}

/// Numbers compare by value so that `1`, `1i64` and `true`-as-`1` rows line up
/// across stores that round-trip integers differently.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn as_number(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

// ─── Field accessors ──────────────────────────────────────

pub fn required_str(record: &Record, field: &str) -> Result<String> {
    optional_str(record, field)
        .ok_or_else(|| OutdialError::Validation(format!("missing required field '{field}'")))
}

pub fn optional_str(record: &Record, field: &str) -> Option<String> {
    match record.get(field) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Integer field; absent or null reads as `default`.
pub fn int_or(record: &Record, field: &str, default: i64) -> Result<i64> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => as_number(v)
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| OutdialError::Validation(format!("field '{field}' is not an integer: {v}"))),
    }
}

pub fn flag(record: &Record, field: &str, default: bool) -> Result<bool> {
    Ok(int_or(record, field, default as i64)? != 0)
}

pub fn optional_time(record: &Record, field: &str) -> Result<Option<DateTime<Utc>>> {
    match optional_str(record, field) {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|e| OutdialError::Validation(format!("field '{field}' is not a timestamp: {e}"))),
    }
}

pub fn time_value(t: Option<DateTime<Utc>>) -> Value {
    t.map(|t| Value::String(t.to_rfc3339())).unwrap_or(Value::Null)
}

pub fn opt_value(s: &Option<String>) -> Value {
    s.as_ref().map(|s| Value::String(s.clone())).unwrap_or(Value::Null)
}

use crate::error::{ExecutionError, ExecutionErrorKind};
use crate::store::guard::check_read_only;
use crate::store::Store;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static ERROR_PATTERNS: Lazy<Vec<(Regex, ExecutionErrorKind)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"(?i)syntax error|incomplete input|unrecognized token").unwrap(),
            ExecutionErrorKind::Syntax,
        ),
        (
            Regex::new(r"(?i)no such column|ambiguous column name").unwrap(),
            ExecutionErrorKind::UnknownColumn,
        ),
        (
            Regex::new(r"(?i)no such table").unwrap(),
            ExecutionErrorKind::UnknownTable,
        ),
        (
            Regex::new(r"(?i)readonly database|query_only").unwrap(),
            ExecutionErrorKind::Unsafe,
        ),
    ]
});

/// column names plus materialized rows of one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// more rows existed than the store's row cap
    pub truncated: bool,
}

pub fn classify_engine_message(message: &str) -> ExecutionErrorKind {
    ERROR_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(message))
        .map(|(_, kind)| *kind)
        .unwrap_or(ExecutionErrorKind::Engine)
}

fn engine_error(err: rusqlite::Error) -> ExecutionError {
    let message = match &err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.clone(),
        rusqlite::Error::MultipleStatement => {
            return ExecutionError::unsafe_statement("only a single sql statement is allowed");
        }
        other => other.to_string(),
    };

    ExecutionError::new(classify_engine_message(&message), message)
}

pub(crate) fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(bytes.iter().map(|b| format!("{:02x}", b)).collect()),
    }
}

/// run one read-only statement against the store
///
/// Anything but a single SELECT/WITH statement is rejected before the engine
/// sees it.
#[tracing::instrument(skip(sql, store), fields(sql_len = sql.len()))]
pub fn execute(sql: &str, store: &Store) -> Result<QueryRows, ExecutionError> {
    if let Err(e) = check_read_only(sql) {
        tracing::warn!(kind = %e.kind, "rejected sql before execution: {}", e.message);
        return Err(e);
    }

    let conn = store.connection();
    conn.execute_batch("PRAGMA query_only = ON")
        .map_err(engine_error)?;

    let result = run_select(store, sql);

    if let Err(e) = conn.execute_batch("PRAGMA query_only = OFF") {
        tracing::warn!("failed to leave query_only mode: {}", e);
    }

    match &result {
        Ok(rows) => tracing::info!(
            rows = rows.rows.len(),
            truncated = rows.truncated,
            "query executed"
        ),
        Err(e) => tracing::warn!(kind = %e.kind, "query failed: {}", e.message),
    }

    result
}

fn run_select(store: &Store, sql: &str) -> Result<QueryRows, ExecutionError> {
    let row_cap = store.options().row_cap;
    let mut stmt = store.connection().prepare(sql).map_err(engine_error)?;

    // catches e.g. `WITH x AS (...) DELETE FROM ...`
    if !stmt.readonly() {
        return Err(ExecutionError::unsafe_statement(
            "statement would modify the database",
        ));
    }

    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();

    let mut rows = Vec::new();
    let mut truncated = false;
    let mut cursor = stmt.query([]).map_err(engine_error)?;

    while let Some(row) = cursor.next().map_err(engine_error)? {
        if rows.len() >= row_cap {
            truncated = true;
            break;
        }

        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(value_to_json(row.get_ref(i).map_err(engine_error)?));
        }
        rows.push(values);
    }

    Ok(QueryRows {
        columns,
        rows,
        truncated,
    })
}

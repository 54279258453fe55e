pub mod guard;
pub mod profile;
pub mod query;

pub use guard::check_read_only;
pub use query::{execute, QueryRows};

use crate::error::{AskJsonError, Result};
use crate::schema::mapping::RowMapping;
use crate::schema::model::{quote_ident, SchemaSet};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use std::collections::BTreeMap;

pub const DEFAULT_ROW_CAP: usize = 1000;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// rows materialized per query before the result is cut off
    pub row_cap: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            row_cap: DEFAULT_ROW_CAP,
        }
    }
}

/// in-memory sqlite database shaped by one schema set
///
/// Wraps a single connection: `Send` but not `Sync`, so concurrent callers
/// must serialize access themselves.
pub struct Store {
    conn: Connection,
    schema: SchemaSet,
    options: StoreOptions,
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

impl Store {
    pub fn create(schema: &SchemaSet) -> Result<Self> {
        Self::create_with(schema, StoreOptions::default())
    }

    #[tracing::instrument(skip(schema, options), fields(tables = schema.tables.len()))]
    pub fn create_with(schema: &SchemaSet, options: StoreOptions) -> Result<Self> {
        schema.validate()?;

        if options.row_cap == 0 {
            return Err(AskJsonError::Config("row cap must be at least 1".to_string()));
        }

        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&schema.to_ddl())?;

        tracing::debug!("created in-memory store");

        Ok(Self {
            conn,
            schema: schema.clone(),
            options,
        })
    }

    pub fn schema(&self) -> &SchemaSet {
        &self.schema
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// map `document` into rows and insert them in one transaction
    #[tracing::instrument(skip(self, mapping, document))]
    pub fn load(&mut self, mapping: &RowMapping, document: &Value) -> Result<BTreeMap<String, usize>> {
        let tables = mapping.apply(&self.schema, document)?;
        let mut counts = BTreeMap::new();

        let tx = self.conn.transaction()?;

        for table in &tables {
            let column_list: Vec<String> = table.columns.iter().map(|c| quote_ident(c)).collect();
            let placeholders = vec!["?"; table.columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(&table.table),
                column_list.join(", "),
                placeholders
            );

            let mut stmt = tx.prepare(&sql)?;
            for row in &table.rows {
                stmt.execute(params_from_iter(row.iter().map(json_to_sql)))?;
            }

            tracing::debug!(table = %table.table, rows = table.rows.len(), "inserted rows");
            counts.insert(table.table.clone(), table.rows.len());
        }

        tx.commit()?;

        tracing::info!(
            total_rows = counts.values().sum::<usize>(),
            "loaded document into store"
        );
        Ok(counts)
    }

    pub fn row_count(&self, table: &str) -> Result<i64> {
        let known = self
            .schema
            .table(table)
            .ok_or_else(|| AskJsonError::Schema(format!("unknown table '{}'", table)))?;

        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(&known.name)),
            [],
            |row| row.get(0),
        )?;

        Ok(count)
    }
}

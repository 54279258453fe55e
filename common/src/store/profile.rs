use crate::error::Result;
use crate::schema::model::{quote_ident, Profile, SchemaSet, ValueRange};
use crate::store::Store;
use rusqlite::types::ValueRef;
use std::collections::BTreeSet;

const MAX_RANGE_EXCEPTIONS: usize = 10;

fn display_value(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
    }
}

impl Store {
    /// fill dynamic example values and ranges from the loaded data
    ///
    /// Returns an enriched copy; hidden columns are left untouched since
    /// their hints never reach a prompt.
    #[tracing::instrument(skip(self, schema))]
    pub fn profile(&self, schema: &SchemaSet) -> Result<SchemaSet> {
        let mut enriched = schema.clone();

        for table in &mut enriched.tables {
            let table_name = table.name.clone();

            for column in &mut table.columns {
                let Some(profile) = column.profile else {
                    continue;
                };
                if !column.visible_to_llm {
                    tracing::debug!(table = %table_name, column = %column.name, "skipping hidden column");
                    continue;
                }

                match profile {
                    Profile::Distinct { limit } => {
                        let values = self.distinct_values(&table_name, &column.name, limit)?;
                        tracing::debug!(
                            table = %table_name,
                            column = %column.name,
                            distinct = values.len(),
                            "profiled distinct values"
                        );
                        column.example_values = if values.is_empty() { None } else { Some(values) };
                    }
                    Profile::Range => {
                        column.range = self.value_range(&table_name, &column.name)?;
                        tracing::debug!(
                            table = %table_name,
                            column = %column.name,
                            has_range = column.range.is_some(),
                            "profiled value range"
                        );
                    }
                }
            }
        }

        Ok(enriched)
    }

    /// most frequent non-null values first
    pub fn distinct_values(&self, table: &str, column: &str, limit: usize) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT {col}, COUNT(*) AS n FROM {table} WHERE {col} IS NOT NULL \
             GROUP BY {col} ORDER BY n DESC, {col} LIMIT ?1",
            col = quote_ident(column),
            table = quote_ident(table)
        );

        let conn = self.connection();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([limit as i64])?;
        let mut values = Vec::new();

        while let Some(row) = rows.next()? {
            if let Some(text) = display_value(row.get_ref(0)?) {
                values.push(text);
            }
        }

        Ok(values)
    }

    /// numeric min/max with non-numeric values as exceptions, or a text
    /// range (iso dates sort correctly) when nothing is numeric
    pub fn value_range(&self, table: &str, column: &str) -> Result<Option<ValueRange>> {
        let col = quote_ident(column);
        let table = quote_ident(table);
        let conn = self.connection();

        let numeric = format!(
            "SELECT MIN({col}), MAX({col}) FROM {table} WHERE typeof({col}) IN ('integer', 'real')"
        );
        let (min, max) = conn.query_row(&numeric, [], |row| {
            Ok((display_value(row.get_ref(0)?), display_value(row.get_ref(1)?)))
        })?;

        if let (Some(min), Some(max)) = (min, max) {
            let exceptions_sql = format!(
                "SELECT DISTINCT {col} FROM {table} WHERE typeof({col}) = 'text' ORDER BY 1 LIMIT ?1"
            );
            let mut stmt = conn.prepare(&exceptions_sql)?;
            let mut rows = stmt.query([MAX_RANGE_EXCEPTIONS as i64])?;
            let mut exceptions = BTreeSet::new();
            while let Some(row) = rows.next()? {
                if let Some(text) = display_value(row.get_ref(0)?) {
                    exceptions.insert(text);
                }
            }

            return Ok(Some(ValueRange {
                min,
                max,
                exceptions,
            }));
        }

        let textual = format!(
            "SELECT MIN({col}), MAX({col}) FROM {table} WHERE typeof({col}) = 'text'"
        );
        let (min, max) = conn.query_row(&textual, [], |row| {
            Ok((display_value(row.get_ref(0)?), display_value(row.get_ref(1)?)))
        })?;

        Ok(match (min, max) {
            (Some(min), Some(max)) => Some(ValueRange {
                min,
                max,
                exceptions: BTreeSet::new(),
            }),
            _ => None,
        })
    }
}

//! Declarative json-to-row mapping.
//!
//! The model describes *where* each column's value lives in the source
//! document; this module walks the document and produces rows. Nothing the
//! model writes is ever executed as code.

use crate::error::{AskJsonError, Result};
use crate::schema::model::{SchemaSet, TableSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ColumnSource {
    /// dotted path inside the current record; numeric segments index arrays
    Field { path: String },
    /// copy a column of the parent row
    Parent { column: String },
    /// 1-based surrogate key, unique per table
    RowKey,
    /// 0-based position of the record within its array
    Index,
    /// the record itself, for arrays of scalars
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    pub table: String,
    /// where the records live: relative to the document root for the main
    /// table, relative to each parent record otherwise; empty means "here"
    #[serde(default)]
    pub path: String,
    pub columns: BTreeMap<String, ColumnSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMapping {
    pub tables: Vec<TableMapping>,
}

/// rows produced for one table, columns in schema order
#[derive(Debug, Clone, PartialEq)]
pub struct MappedTable {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim().trim_start_matches("$.").trim_start_matches('$');
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn records_at<'a>(value: &'a Value, path: &str) -> Vec<&'a Value> {
    match lookup_path(value, path) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

impl RowMapping {
    pub fn table(&self, name: &str) -> Option<&TableMapping> {
        self.tables.iter().find(|t| t.table.eq_ignore_ascii_case(name))
    }

    pub fn validate(&self, schema: &SchemaSet) -> Result<()> {
        let mut seen = HashSet::new();

        for mapping in &self.tables {
            let table = schema.table(&mapping.table).ok_or_else(|| {
                AskJsonError::Mapping(format!("mapping names unknown table '{}'", mapping.table))
            })?;

            if !seen.insert(table.name.to_lowercase()) {
                return Err(AskJsonError::Mapping(format!(
                    "table '{}' is mapped twice",
                    table.name
                )));
            }

            let parent = table.parent_name().and_then(|p| schema.table(p));

            for (column, source) in &mapping.columns {
                if table.column(column).is_none() {
                    return Err(AskJsonError::Mapping(format!(
                        "mapping names unknown column '{}.{}'",
                        table.name, column
                    )));
                }

                match source {
                    ColumnSource::Field { path } if path.trim().is_empty() => {
                        return Err(AskJsonError::Mapping(format!(
                            "{}.{} has an empty field path",
                            table.name, column
                        )));
                    }
                    ColumnSource::Parent { column: parent_column } => {
                        let parent = parent.ok_or_else(|| {
                            AskJsonError::Mapping(format!(
                                "{}.{} copies from a parent, but '{}' has no parent table",
                                table.name, column, table.name
                            ))
                        })?;
                        if parent.column(parent_column).is_none() {
                            return Err(AskJsonError::Mapping(format!(
                                "{}.{} copies unknown parent column '{}.{}'",
                                table.name, column, parent.name, parent_column
                            )));
                        }
                    }
                    _ => {}
                }
            }
        }

        for table in &schema.tables {
            if !seen.contains(&table.name.to_lowercase()) {
                return Err(AskJsonError::Mapping(format!(
                    "table '{}' has no mapping",
                    table.name
                )));
            }
        }

        Ok(())
    }

    /// walk `document` and produce rows for every table, in tree order
    pub fn apply(&self, schema: &SchemaSet, document: &Value) -> Result<Vec<MappedTable>> {
        self.validate(schema)?;

        let main = schema
            .main()
            .ok_or_else(|| AskJsonError::Schema(format!("main table '{}' is not defined", schema.main_table)))?;

        let mut walker = Walker {
            schema,
            mapping: self,
            positions: HashMap::new(),
            tables: Vec::new(),
            counters: HashMap::new(),
        };

        for table in schema.tree_order() {
            walker.positions.insert(table.name.to_lowercase(), walker.tables.len());
            walker.tables.push(MappedTable {
                table: table.name.clone(),
                columns: table.columns.iter().map(|c| c.name.clone()).collect(),
                rows: Vec::new(),
            });
        }

        let main_mapping = walker.mapping_for(&main.name)?;
        let records = records_at(document, &main_mapping.path);
        walker.visit(main, records, None)?;

        Ok(walker.tables)
    }
}

struct Walker<'a> {
    schema: &'a SchemaSet,
    mapping: &'a RowMapping,
    positions: HashMap<String, usize>,
    tables: Vec<MappedTable>,
    counters: HashMap<String, i64>,
}

impl<'a> Walker<'a> {
    fn mapping_for(&self, table: &str) -> Result<&'a TableMapping> {
        self.mapping
            .table(table)
            .ok_or_else(|| AskJsonError::Mapping(format!("table '{}' has no mapping", table)))
    }

    fn next_key(&mut self, table: &str) -> i64 {
        let counter = self.counters.entry(table.to_lowercase()).or_insert(0);
        *counter += 1;
        *counter
    }

    fn visit(
        &mut self,
        table: &'a TableSpec,
        records: Vec<&Value>,
        parent: Option<(&TableSpec, &[Value])>,
    ) -> Result<()> {
        let mapping = self.mapping_for(&table.name)?;
        let children = self.schema.children(&table.name);

        for (index, record) in records.into_iter().enumerate() {
            let mut row = Vec::with_capacity(table.columns.len());

            for column in &table.columns {
                let value = match mapping
                    .columns
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(&column.name))
                    .map(|(_, source)| source)
                {
                    None => Value::Null,
                    Some(ColumnSource::Field { path }) => {
                        lookup_path(record, path).cloned().unwrap_or(Value::Null)
                    }
                    Some(ColumnSource::Parent { column: parent_column }) => parent
                        .and_then(|(parent_table, parent_row)| {
                            parent_table
                                .columns
                                .iter()
                                .position(|c| c.name.eq_ignore_ascii_case(parent_column))
                                .and_then(|i| parent_row.get(i))
                        })
                        .cloned()
                        .unwrap_or(Value::Null),
                    Some(ColumnSource::RowKey) => Value::from(self.next_key(&table.name)),
                    Some(ColumnSource::Index) => Value::from(index as i64),
                    Some(ColumnSource::Value) => record.clone(),
                };
                row.push(value);
            }

            for &child in &children {
                let child_mapping = self.mapping_for(&child.name)?;
                let child_records = records_at(record, &child_mapping.path);
                self.visit(child, child_records, Some((table, &row)))?;
            }

            let position = self.positions[&table.name.to_lowercase()];
            self.tables[position].rows.push(row);
        }

        Ok(())
    }
}

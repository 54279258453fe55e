use crate::error::{AskJsonError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};

static IDENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap()
});

static SQL_TYPE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_ ]*(\(\s*\d+\s*(,\s*\d+\s*)?\))?$").unwrap()
});

pub const DEFAULT_DISTINCT_LIMIT: usize = 12;

fn default_visible() -> bool {
    true
}

fn default_distinct_limit() -> usize {
    DEFAULT_DISTINCT_LIMIT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: String,
    pub max: String,
    /// values that occur in the column but fall outside the numeric range
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub exceptions: BTreeSet<String>,
}

/// request to derive hints for a column from loaded data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Profile {
    Distinct {
        #[serde(default = "default_distinct_limit")]
        limit: usize,
    },
    Range,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(alias = "type")]
    pub sql_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<ForeignKey>,
    #[serde(default = "default_visible")]
    pub visible_to_llm: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<ValueRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

impl ColumnSpec {
    pub fn new(
        name: impl Into<String>,
        sql_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            description: description.into(),
            foreign_key: None,
            visible_to_llm: true,
            example_values: None,
            range: None,
            profile: None,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible_to_llm = false;
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    pub fn with_examples<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.example_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_range(mut self, min: impl Into<String>, max: impl Into<String>) -> Self {
        self.range = Some(ValueRange {
            min: min.into(),
            max: max.into(),
            exceptions: BTreeSet::new(),
        });
        self
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = Some(profile);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            columns,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// sqlite identifiers are case-insensitive, so lookups are too
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnSpec> {
        self.columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn visible_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.visible_to_llm)
    }

    /// the table this one hangs off, taken from its foreign keys
    pub fn parent_name(&self) -> Option<&str> {
        self.columns
            .iter()
            .find_map(|c| c.foreign_key.as_ref())
            .map(|fk| fk.table.as_str())
    }
}

/// tree of tables flattening one kind of json document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSet {
    pub main_table: String,
    pub tables: Vec<TableSpec>,
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl SchemaSet {
    pub fn new(main_table: impl Into<String>, tables: Vec<TableSpec>) -> Self {
        Self {
            main_table: main_table.into(),
            tables,
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableSpec> {
        self.tables
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// whether some foreign key in the set targets `table.column`
    pub fn is_referenced(&self, table: &str, column: &str) -> bool {
        self.tables
            .iter()
            .flat_map(|t| &t.columns)
            .filter_map(|c| c.foreign_key.as_ref())
            .any(|fk| fk.table.eq_ignore_ascii_case(table) && fk.column.eq_ignore_ascii_case(column))
    }

    pub fn main(&self) -> Option<&TableSpec> {
        self.table(&self.main_table)
    }

    pub fn children(&self, name: &str) -> Vec<&TableSpec> {
        self.tables
            .iter()
            .filter(|t| {
                t.parent_name()
                    .map(|p| p.eq_ignore_ascii_case(name))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// tables breadth-first from the main table; parents precede children
    pub fn tree_order(&self) -> Vec<&TableSpec> {
        let mut ordered = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(main) = self.main() {
            queue.push_back(main);
        }

        while let Some(table) = queue.pop_front() {
            if !seen.insert(table.name.to_lowercase()) {
                continue;
            }
            ordered.push(table);
            for child in self.children(&table.name) {
                queue.push_back(child);
            }
        }

        ordered
    }

    pub fn validate(&self) -> Result<()> {
        if self.tables.is_empty() {
            return Err(AskJsonError::Schema("schema set has no tables".to_string()));
        }

        let mut table_names = HashSet::new();
        for table in &self.tables {
            if !IDENT_REGEX.is_match(&table.name) {
                return Err(AskJsonError::Schema(format!(
                    "invalid table name '{}'",
                    table.name
                )));
            }
            if !table_names.insert(table.name.to_lowercase()) {
                return Err(AskJsonError::Schema(format!(
                    "duplicate table '{}'",
                    table.name
                )));
            }
            if table.columns.is_empty() {
                return Err(AskJsonError::Schema(format!(
                    "table '{}' has no columns",
                    table.name
                )));
            }

            let mut column_names = HashSet::new();
            for column in &table.columns {
                if !IDENT_REGEX.is_match(&column.name) {
                    return Err(AskJsonError::Schema(format!(
                        "invalid column name '{}.{}'",
                        table.name, column.name
                    )));
                }
                if !SQL_TYPE_REGEX.is_match(column.sql_type.trim()) {
                    return Err(AskJsonError::Schema(format!(
                        "invalid sql type '{}' for {}.{}",
                        column.sql_type, table.name, column.name
                    )));
                }
                if !column_names.insert(column.name.to_lowercase()) {
                    return Err(AskJsonError::Schema(format!(
                        "duplicate column '{}.{}'",
                        table.name, column.name
                    )));
                }
            }
        }

        let main = self.main().ok_or_else(|| {
            AskJsonError::Schema(format!("main table '{}' is not defined", self.main_table))
        })?;

        for table in &self.tables {
            let mut parents = HashSet::new();
            for column in &table.columns {
                let Some(fk) = &column.foreign_key else {
                    continue;
                };

                let target = self.table(&fk.table).ok_or_else(|| {
                    AskJsonError::Schema(format!(
                        "{}.{} references unknown table '{}'",
                        table.name, column.name, fk.table
                    ))
                })?;

                if target.column(&fk.column).is_none() {
                    return Err(AskJsonError::Schema(format!(
                        "{}.{} references unknown column '{}.{}'",
                        table.name, column.name, fk.table, fk.column
                    )));
                }

                if target.name.eq_ignore_ascii_case(&table.name) {
                    return Err(AskJsonError::Schema(format!(
                        "table '{}' references itself",
                        table.name
                    )));
                }

                parents.insert(target.name.to_lowercase());
            }

            // a junction table would need two parents
            if parents.len() > 1 {
                return Err(AskJsonError::Schema(format!(
                    "table '{}' references more than one parent table; only one-to-many links are supported",
                    table.name
                )));
            }
        }

        if main.parent_name().is_some() {
            return Err(AskJsonError::Schema(format!(
                "main table '{}' must not reference another table",
                main.name
            )));
        }

        let reachable = self.tree_order().len();
        if reachable != self.tables.len() {
            return Err(AskJsonError::Schema(format!(
                "{} tables are not connected to main table '{}' (or form a cycle)",
                self.tables.len() - reachable,
                main.name
            )));
        }

        Ok(())
    }

    /// create table statements in tree order
    pub fn to_ddl(&self) -> String {
        let mut statements = Vec::new();

        for table in self.tree_order() {
            let mut lines: Vec<String> = table
                .columns
                .iter()
                .map(|c| {
                    let mut line = format!("    {} {}", quote_ident(&c.name), c.sql_type.trim());
                    // sqlite rejects foreign keys whose parent column is not unique
                    if self.is_referenced(&table.name, &c.name) {
                        line.push_str(" UNIQUE");
                    }
                    line
                })
                .collect();

            for column in &table.columns {
                if let Some(fk) = &column.foreign_key {
                    lines.push(format!(
                        "    FOREIGN KEY ({}) REFERENCES {} ({})",
                        quote_ident(&column.name),
                        quote_ident(&fk.table),
                        quote_ident(&fk.column)
                    ));
                }
            }

            statements.push(format!(
                "CREATE TABLE {} (\n{}\n);",
                quote_ident(&table.name),
                lines.join(",\n")
            ));
        }

        statements.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trips() -> SchemaSet {
        SchemaSet::new(
            "trips",
            vec![
                TableSpec::new(
                    "trips",
                    vec![
                        ColumnSpec::new("id", "INTEGER", "trip id"),
                        ColumnSpec::new("traveller", "TEXT", "who travelled"),
                    ],
                ),
                TableSpec::new(
                    "legs",
                    vec![
                        ColumnSpec::new("trip_id", "INTEGER", "owning trip").references("trips", "id"),
                        ColumnSpec::new("origin", "TEXT", "departure city"),
                    ],
                ),
                TableSpec::new(
                    "stops",
                    vec![
                        ColumnSpec::new("leg_trip_id", "INTEGER", "owning leg").references("legs", "trip_id"),
                        ColumnSpec::new("city", "TEXT", "stop city"),
                    ],
                ),
            ],
        )
    }

    #[test]
    fn test_valid_tree() {
        let schema = trips();
        assert!(schema.validate().is_ok());

        let order: Vec<&str> = schema.tree_order().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(order, vec!["trips", "legs", "stops"]);
    }

    #[test]
    fn test_unknown_fk_target_fails() {
        let mut schema = trips();
        schema.tables[1].columns[0].foreign_key = Some(ForeignKey {
            table: "journeys".to_string(),
            column: "id".to_string(),
        });

        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("unknown table 'journeys'"));
    }

    #[test]
    fn test_unknown_fk_column_fails() {
        let mut schema = trips();
        schema.tables[1].columns[0].foreign_key = Some(ForeignKey {
            table: "trips".to_string(),
            column: "trip_key".to_string(),
        });

        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_junction_table_rejected() {
        let mut schema = trips();
        schema.tables[2]
            .columns
            .push(ColumnSpec::new("trip_id", "INTEGER", "trip").references("trips", "id"));

        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("more than one parent"));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut schema = trips();
        schema.tables[1].columns[0].foreign_key = Some(ForeignKey {
            table: "stops".to_string(),
            column: "city".to_string(),
        });

        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let mut schema = trips();
        schema.tables[0]
            .columns
            .push(ColumnSpec::new("ID", "INTEGER", "again"));

        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate column"));
    }

    #[test]
    fn test_injected_type_rejected() {
        let mut schema = trips();
        schema.tables[0].columns[1].sql_type = "TEXT); DROP TABLE trips; --".to_string();

        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_ddl_has_foreign_keys() {
        let ddl = trips().to_ddl();
        assert!(ddl.starts_with("CREATE TABLE \"trips\""));
        assert!(ddl.contains("FOREIGN KEY (\"trip_id\") REFERENCES \"trips\" (\"id\")"));
        assert_eq!(ddl.matches("CREATE TABLE").count(), 3);
    }

    #[test]
    fn test_ddl_makes_referenced_columns_unique() {
        let ddl = trips().to_ddl();
        assert!(ddl.contains("\"id\" INTEGER UNIQUE"));
        assert!(ddl.contains("\"trip_id\" INTEGER UNIQUE"));
        assert!(ddl.contains("\"traveller\" TEXT\n"));
        assert!(ddl.contains("\"leg_trip_id\" INTEGER,"));
    }

    #[test]
    fn test_is_referenced_ignores_case() {
        let schema = trips();
        assert!(schema.is_referenced("TRIPS", "Id"));
        assert!(!schema.is_referenced("trips", "traveller"));
        assert!(!schema.is_referenced("stops", "city"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let schema: SchemaSet = serde_json::from_str(
            r#"{
                "main_table": "flights",
                "tables": [{
                    "name": "flights",
                    "columns": [
                        {"name": "id", "type": "INTEGER"},
                        {"name": "origin", "sql_type": "TEXT", "visible_to_llm": false,
                         "profile": {"kind": "distinct"}}
                    ]
                }]
            }"#,
        )
        .unwrap();

        let flights = schema.table("FLIGHTS").unwrap();
        assert!(flights.column("id").unwrap().visible_to_llm);
        assert!(!flights.column("origin").unwrap().visible_to_llm);
        assert_eq!(
            flights.column("origin").unwrap().profile,
            Some(Profile::Distinct { limit: DEFAULT_DISTINCT_LIMIT })
        );
    }
}

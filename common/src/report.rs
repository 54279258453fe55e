use crate::agent::analyze::{AnalysisBundle, AnnotationSet};
use crate::agent::prompt::abridge_sample;
use crate::error::Result;
use crate::schema::hints::FieldHints;
use crate::schema::model::ColumnSpec;
use chrono::{DateTime, Local};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// record of one analyze run: every input and every step's output
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub created_at: DateTime<Local>,
    pub llm: String,
    pub sample: Value,
    pub type_spec: Value,
    pub hints: FieldHints,
    pub bundle: AnalysisBundle,
    pub annotations: AnnotationSet,
    /// rows the sample produced per table
    pub row_counts: BTreeMap<String, usize>,
}

fn json_block(out: &mut String, value: &Value) {
    let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    let _ = writeln!(out, "```json\n{}\n```\n", text);
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn profile_cell(column: &ColumnSpec) -> String {
    match &column.profile {
        Some(profile) => serde_json::to_string(profile).unwrap_or_default(),
        None => String::new(),
    }
}

impl AnalysisReport {
    pub fn new(
        llm: &str,
        sample: Value,
        type_spec: Value,
        hints: FieldHints,
        bundle: AnalysisBundle,
        annotations: AnnotationSet,
        row_counts: BTreeMap<String, usize>,
    ) -> Self {
        Self {
            created_at: Local::now(),
            llm: llm.to_string(),
            sample,
            type_spec,
            hints,
            bundle,
            annotations,
            row_counts,
        }
    }

    pub fn file_name(&self) -> String {
        format!("analysis-{}.md", self.created_at.format("%Y%m%d-%H%M%S"))
    }

    pub fn to_markdown(&self) -> String {
        let schema = &self.bundle.schema;
        let mut out = String::new();

        let _ = writeln!(out, "# schema analysis\n");
        let _ = writeln!(out, "- generated: {}", self.created_at.format("%Y-%m-%d %H:%M:%S %z"));
        let _ = writeln!(out, "- llm: {}", self.llm);
        let _ = writeln!(out, "- main table: {}\n", schema.main_table);

        let _ = writeln!(out, "## sample (abridged)\n");
        json_block(&mut out, &abridge_sample(&self.sample));

        let _ = writeln!(out, "## type spec\n");
        json_block(&mut out, &self.type_spec);

        let _ = writeln!(out, "## field hints\n");
        if self.hints.is_empty() {
            let _ = writeln!(out, "none\n");
        } else {
            for (label, items) in [
                ("timestamps", &self.hints.timestamps),
                ("categories", &self.hints.categories),
                ("collections", &self.hints.collections),
            ] {
                if !items.is_empty() {
                    let _ = writeln!(out, "- {}: {}", label, items.join(", "));
                }
            }
            out.push('\n');
        }

        let _ = writeln!(out, "## tables\n");
        for table in schema.tree_order() {
            let _ = writeln!(out, "### {}\n", table.name);
            if let Some(parent) = table.parent_name() {
                let _ = writeln!(out, "child of `{}`\n", parent);
            }
            if !table.description.is_empty() {
                let _ = writeln!(out, "{}\n", table.description);
            }

            let _ = writeln!(out, "| column | type | visible | description | profile |");
            let _ = writeln!(out, "|---|---|---|---|---|");
            for column in &table.columns {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} |",
                    column.name,
                    column.sql_type,
                    if column.visible_to_llm { "yes" } else { "no" },
                    cell(&column.description),
                    cell(&profile_cell(column))
                );
            }
            out.push('\n');
        }

        let _ = writeln!(out, "## ddl\n\n```sql\n{}\n```\n", schema.to_ddl());

        let _ = writeln!(out, "## row mapping\n");
        json_block(
            &mut out,
            &serde_json::to_value(&self.bundle.mapping).unwrap_or(Value::Null),
        );

        let _ = writeln!(out, "## column annotations\n");
        json_block(
            &mut out,
            &serde_json::to_value(&self.annotations).unwrap_or(Value::Null),
        );

        let _ = writeln!(out, "## sample load\n");
        let _ = writeln!(out, "| table | rows |");
        let _ = writeln!(out, "|---|---|");
        for (table, rows) in &self.row_counts {
            let _ = writeln!(out, "| {} | {} |", table, rows);
        }

        out
    }

    /// write the markdown report into `dir`, returning its path
    #[tracing::instrument(skip(self))]
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join(self.file_name());
        std::fs::write(&path, self.to_markdown())?;

        tracing::info!(path = %path.display(), "saved analysis report");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::mapping::RowMapping;
    use crate::schema::model::{SchemaSet, TableSpec};
    use chrono::TimeZone;
    use serde_json::json;

    fn report() -> AnalysisReport {
        let schema = SchemaSet::new(
            "notes",
            vec![TableSpec::new(
                "notes",
                vec![
                    ColumnSpec::new("id", "INTEGER", "key").hidden(),
                    ColumnSpec::new("body", "TEXT", "note | text"),
                ],
            )
            .with_description("one row per note")],
        );
        let mapping: RowMapping = serde_json::from_value(json!({
            "tables": [{"table": "notes", "path": "notes", "columns": {
                "id": {"source": "row_key"}, "body": {"source": "field", "path": "body"}}}]
        }))
        .unwrap();

        let mut report = AnalysisReport::new(
            "fake/model",
            json!({"notes": [{"body": "hi"}]}),
            json!({"type": "object"}),
            FieldHints::default(),
            AnalysisBundle { schema, mapping },
            AnnotationSet::default(),
            BTreeMap::from([("notes".to_string(), 1)]),
        );
        report.created_at = Local.with_ymd_and_hms(2024, 3, 2, 9, 30, 5).unwrap();
        report
    }

    #[test]
    fn test_file_name_uses_timestamp() {
        assert_eq!(report().file_name(), "analysis-20240302-093005.md");
    }

    #[test]
    fn test_markdown_sections() {
        let markdown = report().to_markdown();

        assert!(markdown.starts_with("# schema analysis"));
        assert!(markdown.contains("- llm: fake/model"));
        assert!(markdown.contains("| id | INTEGER | no | key |  |"));
        assert!(markdown.contains("| body | TEXT | yes | note \\| text |  |"));
        assert!(markdown.contains("CREATE TABLE \"notes\""));
        assert!(markdown.contains("| notes | 1 |"));
        assert!(markdown.contains("## field hints\n\nnone"));
    }

    #[test]
    fn test_save_writes_file() {
        let dir = std::env::temp_dir().join(format!("askjson-report-{}", std::process::id()));
        let path = report().save(&dir).unwrap();

        assert!(path.ends_with("analysis-20240302-093005.md"));
        assert!(std::fs::read_to_string(&path).unwrap().contains("## row mapping"));
        std::fs::remove_dir_all(&dir).ok();
    }
}

use crate::agent::executor::complete_with_retry;
use crate::agent::parser::extract_json_block;
use crate::agent::prompt::{
    build_annotation_prompt, build_layout_prompt, build_mapping_prompt, ANNOTATION_SYSTEM_PROMPT,
    LAYOUT_SYSTEM_PROMPT, MAPPING_SYSTEM_PROMPT,
};
use crate::dag::task::{
    ColumnAnnotationTask, RowMappingTask, TableLayoutTask, TypeSpecTask, COLUMN_ANNOTATION_TASK,
    ROW_MAPPING_TASK, TABLE_LAYOUT_TASK, TYPE_SPEC_TASK,
};
use crate::dag::{Dag, DagExecutor, Task, TaskContext, TaskOutput, TaskResult};
use crate::error::{AskJsonError, Result};
use crate::llm::client::LlmClient;
use crate::report::AnalysisReport;
use crate::schema::hints::{derive_field_hints, FieldHints};
use crate::schema::inference::infer_type_spec;
use crate::schema::mapping::RowMapping;
use crate::schema::model::{Profile, SchemaSet};
use crate::store::Store;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// everything `ask` needs to load data and prompt: the tables plus the
/// document-to-row mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisBundle {
    pub schema: SchemaSet,
    pub mapping: RowMapping,
}

impl AnalysisBundle {
    pub fn validate(&self) -> Result<()> {
        self.schema.validate()?;
        self.mapping.validate(&self.schema)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let bundle: Self = serde_json::from_str(&text)?;
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// per-column notes from the annotation step; absent fields leave the
/// column as designed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnAnnotation {
    pub table: String,
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_to_llm: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationSet {
    pub columns: Vec<ColumnAnnotation>,
}

#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    /// add llm-written descriptions to the inferred type spec
    pub describe_types: bool,
    /// llm calls allowed per step
    pub max_attempts: usize,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            describe_types: false,
            max_attempts: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Analysis {
    pub bundle: AnalysisBundle,
    pub report: AnalysisReport,
}

fn parse_layout(raw: &str) -> Result<SchemaSet> {
    let schema: SchemaSet = extract_json_block(raw)?;
    schema.validate()?;
    Ok(schema)
}

fn parse_mapping(raw: &str, schema: &SchemaSet, sample: &Value) -> Result<RowMapping> {
    let mapping: RowMapping = extract_json_block(raw)?;
    mapping.validate(schema)?;

    // dry run against the sample so broken paths surface now
    let mut scratch = Store::create(schema)?;
    let counts = scratch.load(&mapping, sample)?;

    let main_rows = schema
        .main()
        .and_then(|main| counts.get(&main.name))
        .copied()
        .unwrap_or(0);
    if main_rows == 0 {
        return Err(AskJsonError::Mapping(format!(
            "mapping produced no rows for main table '{}'",
            schema.main_table
        )));
    }

    Ok(mapping)
}

/// ask the model for a table layout and validate it
#[tracing::instrument(skip_all, fields(llm = llm.name()))]
pub async fn design_tables(
    llm: &dyn LlmClient,
    type_spec: &Value,
    hints: &FieldHints,
    sample: &Value,
    max_attempts: usize,
) -> Result<SchemaSet> {
    let prompt = build_layout_prompt(type_spec, hints, sample);
    let schema = complete_with_retry(
        llm,
        "table layout",
        LAYOUT_SYSTEM_PROMPT,
        &prompt,
        max_attempts,
        parse_layout,
    )
    .await?;

    tracing::info!(
        tables = schema.tables.len(),
        main_table = %schema.main_table,
        "table layout designed"
    );
    Ok(schema)
}

/// ask the model how the sample maps onto `schema`; accepted only when it
/// validates and loads the sample
#[tracing::instrument(skip_all, fields(llm = llm.name()))]
pub async fn design_mapping(
    llm: &dyn LlmClient,
    schema: &SchemaSet,
    sample: &Value,
    max_attempts: usize,
) -> Result<RowMapping> {
    let prompt = build_mapping_prompt(schema, sample);
    let mapping = complete_with_retry(
        llm,
        "row mapping",
        MAPPING_SYSTEM_PROMPT,
        &prompt,
        max_attempts,
        |raw| parse_mapping(raw, schema, sample),
    )
    .await?;

    tracing::info!(tables = mapping.tables.len(), "row mapping designed");
    Ok(mapping)
}

#[tracing::instrument(skip_all, fields(llm = llm.name()))]
pub async fn annotate_columns(
    llm: &dyn LlmClient,
    schema: &SchemaSet,
    sample: &Value,
    max_attempts: usize,
) -> Result<AnnotationSet> {
    let prompt = build_annotation_prompt(schema, sample);
    let annotations: AnnotationSet = complete_with_retry(
        llm,
        "column annotation",
        ANNOTATION_SYSTEM_PROMPT,
        &prompt,
        max_attempts,
        |raw| extract_json_block(raw),
    )
    .await?;

    tracing::info!(columns = annotations.columns.len(), "columns annotated");
    Ok(annotations)
}

/// merge annotations into a copy of `schema`
///
/// Unknown tables or columns are skipped with a warning. Foreign key
/// columns stay visible so joins remain expressible.
pub fn apply_annotations(schema: &SchemaSet, annotations: &AnnotationSet) -> SchemaSet {
    let mut annotated = schema.clone();

    for note in &annotations.columns {
        let join_target = schema.is_referenced(&note.table, &note.column);
        let Some(column) = annotated
            .table_mut(&note.table)
            .and_then(|t| t.column_mut(&note.column))
        else {
            tracing::warn!(
                table = %note.table,
                column = %note.column,
                "annotation for unknown column ignored"
            );
            continue;
        };

        if let Some(description) = note.description.as_deref().map(str::trim) {
            if !description.is_empty() {
                column.description = description.to_string();
            }
        }

        match note.visible_to_llm {
            Some(false) if column.foreign_key.is_some() || join_target => {
                tracing::debug!(column = %column.name, "keeping join column visible");
            }
            Some(visible) => column.visible_to_llm = visible,
            None => {}
        }

        if note.profile.is_some() {
            column.profile = note.profile;
        }
    }

    annotated
}

fn take_output(results: &mut HashMap<String, TaskResult>, id: &str) -> Result<TaskOutput> {
    results
        .remove(id)
        .map(|r| r.output)
        .ok_or_else(|| AskJsonError::Analysis(format!("task '{}' produced no result", id)))
}

/// derive a schema bundle for documents shaped like `sample`
///
/// Steps run as a dag: type spec, then table layout, then row mapping and
/// column annotation side by side.
#[tracing::instrument(skip_all, fields(llm = llm.name(), describe_types = options.describe_types))]
pub async fn analyze(
    llm: Arc<dyn LlmClient>,
    sample: Value,
    options: &AnalyzeOptions,
) -> Result<Analysis> {
    let type_spec = infer_type_spec(&sample);
    let hints = derive_field_hints(&type_spec);

    tracing::info!(
        root = type_spec.kind_name(),
        timestamps = hints.timestamps.len(),
        categories = hints.categories.len(),
        collections = hints.collections.len(),
        "inferred type spec"
    );

    let mut dag = Dag::new();
    dag.add_task(TYPE_SPEC_TASK.to_string(), vec![]);
    dag.add_task(TABLE_LAYOUT_TASK.to_string(), vec![TYPE_SPEC_TASK.to_string()]);
    dag.add_task(ROW_MAPPING_TASK.to_string(), vec![TABLE_LAYOUT_TASK.to_string()]);
    dag.add_task(COLUMN_ANNOTATION_TASK.to_string(), vec![TABLE_LAYOUT_TASK.to_string()]);

    let mut tasks: HashMap<String, Arc<dyn Task>> = HashMap::new();
    tasks.insert(
        TYPE_SPEC_TASK.to_string(),
        Arc::new(TypeSpecTask {
            describe_with_llm: options.describe_types,
        }),
    );
    tasks.insert(TABLE_LAYOUT_TASK.to_string(), Arc::new(TableLayoutTask));
    tasks.insert(ROW_MAPPING_TASK.to_string(), Arc::new(RowMappingTask));
    tasks.insert(COLUMN_ANNOTATION_TASK.to_string(), Arc::new(ColumnAnnotationTask));

    let ctx = TaskContext::new(
        Arc::new(sample.clone()),
        type_spec,
        hints.clone(),
        Arc::clone(&llm),
        options.max_attempts,
    );

    let executor = DagExecutor::new(dag)?;
    let mut results = executor.execute(tasks, ctx).await?;

    let json_schema = match take_output(&mut results, TYPE_SPEC_TASK)? {
        TaskOutput::TypeSpec(value) => value,
        other => return Err(unexpected(TYPE_SPEC_TASK, &other)),
    };
    let layout = match take_output(&mut results, TABLE_LAYOUT_TASK)? {
        TaskOutput::Schema(schema) => schema,
        other => return Err(unexpected(TABLE_LAYOUT_TASK, &other)),
    };
    let mapping = match take_output(&mut results, ROW_MAPPING_TASK)? {
        TaskOutput::Mapping(mapping) => mapping,
        other => return Err(unexpected(ROW_MAPPING_TASK, &other)),
    };
    let annotations = match take_output(&mut results, COLUMN_ANNOTATION_TASK)? {
        TaskOutput::Annotations(annotations) => annotations,
        other => return Err(unexpected(COLUMN_ANNOTATION_TASK, &other)),
    };

    let schema = apply_annotations(&layout, &annotations);
    let bundle = AnalysisBundle { schema, mapping };
    bundle.validate()?;

    let mut store = Store::create(&bundle.schema)?;
    let row_counts = store.load(&bundle.mapping, &sample)?;

    let report = AnalysisReport::new(
        llm.name(),
        sample,
        json_schema,
        hints,
        bundle.clone(),
        annotations,
        row_counts,
    );

    tracing::info!(tables = bundle.schema.tables.len(), "analysis complete");
    Ok(Analysis { bundle, report })
}

fn unexpected(id: &str, output: &TaskOutput) -> AskJsonError {
    AskJsonError::Analysis(format!(
        "task '{}' returned unexpected output: {}",
        id,
        output.kind_name()
    ))
}

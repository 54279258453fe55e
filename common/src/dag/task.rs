use crate::agent::analyze::{annotate_columns, design_mapping, design_tables, AnnotationSet};
use crate::agent::type_spec_enhancer::enhance_type_spec;
use crate::error::{AskJsonError, Result};
use crate::llm::client::LlmClient;
use crate::schema::hints::FieldHints;
use crate::schema::inference::TypeSpec;
use crate::schema::json_schema::to_json_schema;
use crate::schema::mapping::RowMapping;
use crate::schema::model::SchemaSet;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const TYPE_SPEC_TASK: &str = "type_spec";
pub const TABLE_LAYOUT_TASK: &str = "table_layout";
pub const ROW_MAPPING_TASK: &str = "row_mapping";
pub const COLUMN_ANNOTATION_TASK: &str = "column_annotation";

/// context passed to each task during execution
#[derive(Clone)]
pub struct TaskContext {
    pub sample: Arc<Value>,
    pub type_spec: TypeSpec,
    pub hints: FieldHints,
    pub llm: Arc<dyn LlmClient>,
    pub max_attempts: usize,
    /// outputs of every task finished in earlier levels
    pub upstream: Arc<HashMap<String, TaskOutput>>,
}

impl TaskContext {
    pub fn new(
        sample: Arc<Value>,
        type_spec: TypeSpec,
        hints: FieldHints,
        llm: Arc<dyn LlmClient>,
        max_attempts: usize,
    ) -> Self {
        Self {
            sample,
            type_spec,
            hints,
            llm,
            max_attempts,
            upstream: Arc::new(HashMap::new()),
        }
    }

    pub fn with_upstream(&self, upstream: Arc<HashMap<String, TaskOutput>>) -> Self {
        Self {
            upstream,
            ..self.clone()
        }
    }

    fn upstream_output(&self, id: &str) -> Result<&TaskOutput> {
        self.upstream.get(id).ok_or_else(|| {
            AskJsonError::Analysis(format!("upstream task '{}' has not run", id))
        })
    }

    pub fn upstream_type_spec(&self) -> Result<&Value> {
        match self.upstream_output(TYPE_SPEC_TASK)? {
            TaskOutput::TypeSpec(value) => Ok(value),
            other => Err(AskJsonError::Analysis(format!(
                "expected a type spec upstream, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn upstream_schema(&self) -> Result<&SchemaSet> {
        match self.upstream_output(TABLE_LAYOUT_TASK)? {
            TaskOutput::Schema(schema) => Ok(schema),
            other => Err(AskJsonError::Analysis(format!(
                "expected a table layout upstream, got {}",
                other.kind_name()
            ))),
        }
    }
}

/// output from a task execution
#[derive(Debug, Clone)]
pub enum TaskOutput {
    /// json schema rendering of the inferred type spec
    TypeSpec(Value),
    Schema(SchemaSet),
    Mapping(RowMapping),
    Annotations(AnnotationSet),
}

impl TaskOutput {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TaskOutput::TypeSpec(_) => "type spec",
            TaskOutput::Schema(_) => "schema",
            TaskOutput::Mapping(_) => "mapping",
            TaskOutput::Annotations(_) => "annotations",
        }
    }
}

/// result of a task execution including metadata
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: String,
    pub output: TaskOutput,
    pub duration_ms: u64,
}

/// trait for tasks that can be executed in the dag
#[async_trait]
pub trait Task: Send + Sync {
    /// unique identifier for this task
    fn id(&self) -> &str;

    /// execute the task with given context
    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput>;
}

/// rule-based json schema of the sample, optionally described by the llm
pub struct TypeSpecTask {
    pub describe_with_llm: bool,
}

#[async_trait]
impl Task for TypeSpecTask {
    fn id(&self) -> &str {
        TYPE_SPEC_TASK
    }

    #[tracing::instrument(skip(self, ctx), fields(task.id = %self.id(), describe_with_llm = self.describe_with_llm))]
    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput> {
        let json_schema = to_json_schema(&ctx.type_spec, Some("document"));

        if !self.describe_with_llm {
            return Ok(TaskOutput::TypeSpec(json_schema));
        }

        match enhance_type_spec(ctx.llm.as_ref(), &json_schema, &ctx.hints, ctx.max_attempts).await {
            Ok(described) => Ok(TaskOutput::TypeSpec(described)),
            Err(e @ AskJsonError::Transport(_)) => Err(e),
            Err(e) => {
                tracing::warn!("keeping undescribed type spec: {}", e);
                Ok(TaskOutput::TypeSpec(json_schema))
            }
        }
    }
}

pub struct TableLayoutTask;

#[async_trait]
impl Task for TableLayoutTask {
    fn id(&self) -> &str {
        TABLE_LAYOUT_TASK
    }

    #[tracing::instrument(skip(self, ctx), fields(task.id = %self.id()))]
    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput> {
        let type_spec = ctx.upstream_type_spec()?;
        let schema = design_tables(
            ctx.llm.as_ref(),
            type_spec,
            &ctx.hints,
            &ctx.sample,
            ctx.max_attempts,
        )
        .await?;

        Ok(TaskOutput::Schema(schema))
    }
}

pub struct RowMappingTask;

#[async_trait]
impl Task for RowMappingTask {
    fn id(&self) -> &str {
        ROW_MAPPING_TASK
    }

    #[tracing::instrument(skip(self, ctx), fields(task.id = %self.id()))]
    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput> {
        let schema = ctx.upstream_schema()?;
        let mapping =
            design_mapping(ctx.llm.as_ref(), schema, &ctx.sample, ctx.max_attempts).await?;

        Ok(TaskOutput::Mapping(mapping))
    }
}

pub struct ColumnAnnotationTask;

#[async_trait]
impl Task for ColumnAnnotationTask {
    fn id(&self) -> &str {
        COLUMN_ANNOTATION_TASK
    }

    #[tracing::instrument(skip(self, ctx), fields(task.id = %self.id()))]
    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput> {
        let schema = ctx.upstream_schema()?;
        let annotations =
            annotate_columns(ctx.llm.as_ref(), schema, &ctx.sample, ctx.max_attempts).await?;

        Ok(TaskOutput::Annotations(annotations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::FnClient;
    use crate::llm::message::Message;
    use crate::schema::inference::infer_type_spec;
    use serde_json::json;

    fn context(llm: Arc<dyn LlmClient>) -> TaskContext {
        let sample = json!({"to": "Paris"});
        let type_spec = infer_type_spec(&sample);
        TaskContext::new(Arc::new(sample), type_spec, FieldHints::default(), llm, 1)
    }

    #[tokio::test]
    async fn test_type_spec_task_without_llm() {
        let llm: Arc<dyn LlmClient> = Arc::new(FnClient::new("unused", |_: &[Message]| {
            Err(AskJsonError::Transport("should not be called".to_string()))
        }));

        let output = TypeSpecTask {
            describe_with_llm: false,
        }
        .execute(context(llm))
        .await
        .unwrap();

        match output {
            TaskOutput::TypeSpec(value) => assert_eq!(value["title"], json!("document")),
            other => panic!("unexpected output {}", other.kind_name()),
        }
    }

    #[tokio::test]
    async fn test_type_spec_task_falls_back_on_bad_reply() {
        let llm: Arc<dyn LlmClient> =
            Arc::new(FnClient::new("fake", |_: &[Message]| Ok("no json".to_string())));

        let output = TypeSpecTask {
            describe_with_llm: true,
        }
        .execute(context(llm))
        .await
        .unwrap();

        assert!(matches!(output, TaskOutput::TypeSpec(_)));
    }

    #[tokio::test]
    async fn test_layout_task_needs_upstream() {
        let llm: Arc<dyn LlmClient> =
            Arc::new(FnClient::new("fake", |_: &[Message]| Ok(String::new())));

        let result = TableLayoutTask.execute(context(llm)).await;
        assert!(matches!(result, Err(AskJsonError::Analysis(_))));
    }
}

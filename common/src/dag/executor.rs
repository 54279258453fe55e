use crate::dag::graph::Dag;
use crate::dag::task::{Task, TaskContext, TaskOutput, TaskResult};
use crate::error::{AskJsonError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::Instrument;

/// executes a dag of tasks with parallel execution at each level
pub struct DagExecutor {
    dag: Dag,
}

impl DagExecutor {
    pub fn new(dag: Dag) -> Result<Self> {
        dag.validate()?;
        Ok(Self { dag })
    }

    /// run every level in order; tasks within a level run concurrently and
    /// see the outputs of all earlier levels
    pub async fn execute(
        &self,
        tasks: HashMap<String, Arc<dyn Task>>,
        ctx: TaskContext,
    ) -> Result<HashMap<String, TaskResult>> {
        let task_count = tasks.len();
        let levels = self.dag.topological_levels()?;
        let mut results: HashMap<String, TaskResult> = HashMap::new();

        let span = tracing::info_span!("dag_executor::execute", dag.task_count = task_count);

        async {
            tracing::info!(total_tasks = task_count, levels = levels.len(), "executing dag");

            for (level_idx, task_ids) in levels.iter().enumerate() {
                let level_span = tracing::info_span!(
                    "dag_level",
                    dag.level = level_idx,
                    dag.level_task_count = task_ids.len()
                );

                let upstream: HashMap<String, TaskOutput> = results
                    .iter()
                    .map(|(id, r)| (id.clone(), r.output.clone()))
                    .collect();
                let level_ctx = ctx.with_upstream(Arc::new(upstream));

                let mut join_set = JoinSet::new();

                for task_id in task_ids {
                    let task = Arc::clone(tasks.get(task_id).ok_or_else(|| {
                        AskJsonError::Analysis(format!("task not found: {}", task_id))
                    })?);

                    let task_ctx = level_ctx.clone();
                    let task_id_owned = task_id.clone();

                    let task_span = tracing::info_span!(
                        parent: &level_span,
                        "task",
                        task.id = %task_id_owned,
                        otel.kind = "internal"
                    );

                    let task_future = async move {
                        let start = std::time::Instant::now();

                        tracing::info!("executing task");
                        let output = task.execute(task_ctx).await?;

                        let duration_ms = start.elapsed().as_millis() as u64;
                        tracing::info!(task.duration_ms = duration_ms, "task completed successfully");

                        Ok::<_, AskJsonError>(TaskResult {
                            task_id: task_id_owned,
                            output,
                            duration_ms,
                        })
                    }
                    .instrument(task_span);

                    join_set.spawn(task_future);
                }

                // first failure aborts the remaining tasks of the level
                while let Some(joined) = join_set.join_next().await {
                    let task_result = joined
                        .map_err(|e| AskJsonError::Analysis(format!("task join error: {}", e)))??;

                    results.insert(task_result.task_id.clone(), task_result);
                }

                tracing::info!(parent: &level_span, "level {} completed", level_idx);
            }

            tracing::info!(completed_tasks = results.len(), "dag execution complete");
            Ok::<_, AskJsonError>(results)
        }
        .instrument(span)
        .await
    }
}

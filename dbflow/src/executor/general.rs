use async_trait::async_trait;

use dbflow_shared::errors::DbflowResult;

use super::{RunContext, RunOnceOutcome, TaskExecutor};
use crate::api::{Task, TaskRunResult};

/// Executor for `general` tasks, which carry no work of their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneralExecutor;

#[async_trait]
impl TaskExecutor for GeneralExecutor {
    async fn run_once(&self, ctx: &RunContext, task: &Task) -> DbflowResult<RunOnceOutcome> {
        ctx.check()?;
        tracing::debug!(task_id = task.id, "Run general task");
        Ok((true, Some(TaskRunResult::detail("No-op task"))))
    }
}

use async_trait::async_trait;

use dbflow_shared::errors::{DbflowError, DbflowResult};

use super::{ExecutorEnv, RunContext, RunOnceOutcome, TaskExecutor};
use crate::api::{Task, TaskRunResult, TaskSyncPayload};

/// Executor for `sync` tasks.
///
/// Without a database reference the whole instance is synced; with one, only
/// that database's schema.
pub struct SyncExecutor {
    env: ExecutorEnv,
}

impl SyncExecutor {
    pub fn new(env: ExecutorEnv) -> Self {
        Self { env }
    }
}

#[async_trait]
impl TaskExecutor for SyncExecutor {
    async fn run_once(&self, ctx: &RunContext, task: &Task) -> DbflowResult<RunOnceOutcome> {
        let _payload: TaskSyncPayload = serde_json::from_str(&task.payload)
            .map_err(|e| DbflowError::InvalidArgument(format!("invalid sync payload: {e}")))?;
        let (instance, database) = self.env.resolve_target(task)?;
        ctx.check()?;

        let detail = match database {
            None => {
                let metadata = self
                    .env
                    .with_driver(&instance, None, |driver| async move {
                        ctx.guard(driver.sync_instance()).await
                    })
                    .await?;
                format!(
                    "Synced instance {:?}: version {}, {} databases",
                    instance.name,
                    metadata.version,
                    metadata.databases.len()
                )
            }
            Some(database) => {
                let schema = self
                    .env
                    .with_driver(&instance, Some(database.name.as_str()), |driver| async move {
                        ctx.guard(driver.sync_db_schema()).await
                    })
                    .await?;
                format!(
                    "Synced database {:?}: {} schemas, {} tables",
                    database.name,
                    schema.schemas.len(),
                    schema.table_count()
                )
            }
        };

        tracing::debug!(task_id = task.id, %detail, "Sync finished");
        Ok((true, Some(TaskRunResult::detail(detail))))
    }
}

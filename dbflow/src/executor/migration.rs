use async_trait::async_trait;

use dbflow_shared::errors::{DbflowError, DbflowResult};

use super::{ExecutorEnv, RunContext, RunOnceOutcome, TaskExecutor};
use crate::api::{Task, TaskMigrationPayload, TaskRunResult};
use crate::plugin::AdviceStatus;

/// Executor for `migration` tasks.
///
/// Reviews the statement with every advisor, then executes it through the
/// target database's admin driver.
pub struct MigrationExecutor {
    env: ExecutorEnv,
}

impl MigrationExecutor {
    pub fn new(env: ExecutorEnv) -> Self {
        Self { env }
    }

    fn review(&self, statement: &str) -> DbflowResult<()> {
        for advisor in &self.env.advisors {
            let advices = advisor.check(statement).map_err(|e| {
                DbflowError::Internal(format!("advisor {} failed: {}", advisor.name(), e))
            })?;
            for advice in advices {
                match advice.status {
                    AdviceStatus::Error => {
                        return Err(DbflowError::InvalidArgument(format!(
                            "SQL review failed: {}: {}",
                            advice.title, advice.content
                        )));
                    }
                    AdviceStatus::Warn => {
                        tracing::warn!(
                            advisor = advisor.name(),
                            code = advice.code,
                            title = %advice.title,
                            "SQL review warning"
                        );
                    }
                    AdviceStatus::Success => {}
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaskExecutor for MigrationExecutor {
    async fn run_once(&self, ctx: &RunContext, task: &Task) -> DbflowResult<RunOnceOutcome> {
        let payload: TaskMigrationPayload = serde_json::from_str(&task.payload)
            .map_err(|e| DbflowError::InvalidArgument(format!("invalid migration payload: {e}")))?;
        if payload.statement.trim().is_empty() {
            return Err(DbflowError::InvalidArgument(
                "migration statement is empty".to_string(),
            ));
        }

        self.review(&payload.statement)?;
        ctx.check()?;

        let (instance, database) = self.env.resolve_target(task)?;
        let database_name = database.as_ref().map(|d| d.name.as_str());
        tracing::debug!(
            task_id = task.id,
            instance = %instance.name,
            database = database_name.unwrap_or_default(),
            "Start migration"
        );

        let statement = payload.statement.as_str();
        let rows = self
            .env
            .with_driver(&instance, database_name, |driver| async move {
                ctx.guard(driver.execute(statement)).await
            })
            .await?;

        Ok((
            true,
            Some(TaskRunResult {
                detail: format!("Applied migration, {rows} rows affected"),
                version: payload.schema_version,
            }),
        ))
    }
}

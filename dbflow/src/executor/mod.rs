//! Task executors.
//!
//! Each task type has exactly one executor implementing [`TaskExecutor`].
//! Executors never touch task or task run state; they report an outcome and
//! the scheduler persists the transition.
//!
//! ## Contract
//!
//! `run_once` returns `(terminated, result)`:
//! - `Ok((true, result))`: the task is done
//! - `Ok((false, result))`: still progressing, call again on the next tick
//! - `Err(e)`: always terminal, the task failed

mod backup;
mod disk;
mod general;
mod migration;
#[cfg(test)]
mod scripted;
mod sync;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use dbflow_shared::errors::{DbflowError, DbflowResult, ResultExt};

use crate::api::{Database, DatabaseFind, Instance, InstanceFind, Task, TaskRunResult, TaskType};
use crate::db::{BackupStore, DatabaseStore, InstanceStore};
use crate::plugin::{Advisor, Driver, DriverFactory, ObjectStorage};

pub use backup::{BackupExecutor, backup_relative_path, validate_backup_name};
pub use disk::{DiskProbe, StatvfsProbe};
pub use general::GeneralExecutor;
pub use migration::MigrationExecutor;
#[cfg(test)]
pub use scripted::ScriptedExecutor;
pub use sync::SyncExecutor;

/// Outcome of one `run_once` call: `(terminated, result)`.
pub type RunOnceOutcome = (bool, Option<TaskRunResult>);

/// Per-run context handed to an executor.
///
/// Carries the cooperative cancellation signal and the run's deadline.
/// Executors call [`RunContext::check`] between steps and wrap long I/O in
/// [`RunContext::guard`], so a stopped run still unwinds through its own
/// cleanup (closing drivers, removing partial files).
#[derive(Debug, Clone)]
pub struct RunContext {
    task_run_id: i64,
    cancel: watch::Receiver<bool>,
    deadline: Option<(Instant, Duration)>,
}

impl RunContext {
    pub fn new(task_run_id: i64, cancel: watch::Receiver<bool>) -> Self {
        Self {
            task_run_id,
            cancel,
            deadline: None,
        }
    }

    /// A context that is never cancelled.
    pub fn detached(task_run_id: i64) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(task_run_id, rx)
    }

    /// Give the run `budget` from now. Past it, `check` and `guard` fail
    /// with `Timeout`.
    pub fn with_timeout(mut self, budget: Duration) -> Self {
        self.deadline = Some((Instant::now() + budget, budget));
        self
    }

    pub fn task_run_id(&self) -> i64 {
        self.task_run_id
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn cancelled_error(&self) -> DbflowError {
        DbflowError::Cancelled(format!("task run {} was canceled", self.task_run_id))
    }

    fn timeout_error(&self, budget: Duration) -> DbflowError {
        DbflowError::Timeout(format!(
            "task run {} did not finish within {}s",
            self.task_run_id,
            budget.as_secs()
        ))
    }

    /// Fail with `Cancelled` if the run was asked to stop, or `Timeout` if
    /// its deadline passed.
    pub fn check(&self) -> DbflowResult<()> {
        if self.is_cancelled() {
            return Err(self.cancelled_error());
        }
        if let Some((deadline, budget)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(self.timeout_error(budget));
            }
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the run is cancelled or times out
    /// first. `fut` is dropped on interruption; the caller's cleanup runs.
    pub async fn guard<T, F>(&self, fut: F) -> DbflowResult<T>
    where
        F: Future<Output = DbflowResult<T>>,
    {
        self.check()?;
        let mut cancel = self.cancel.clone();
        let cancelled = async move {
            // A dropped sender can never cancel.
            if cancel.wait_for(|c| *c).await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some((deadline, budget)) => {
                    tokio::time::sleep_until(deadline).await;
                    budget
                }
                None => std::future::pending::<Duration>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(self.cancelled_error()),
            budget = expired => Err(self.timeout_error(budget)),
            result = fut => result,
        }
    }
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn run_once(&self, ctx: &RunContext, task: &Task) -> DbflowResult<RunOnceOutcome>;
}

/// Capability handles and settings shared by all executors.
#[derive(Clone)]
pub struct ExecutorEnv {
    pub instances: InstanceStore,
    pub databases: DatabaseStore,
    pub backups: BackupStore,
    pub drivers: Arc<dyn DriverFactory>,
    pub storage: Option<Arc<dyn ObjectStorage>>,
    pub advisors: Vec<Arc<dyn Advisor>>,
    pub disk: Arc<dyn DiskProbe>,
    pub data_dir: PathBuf,
    pub min_backup_free_bytes: u64,
}

impl ExecutorEnv {
    /// Load the instance and optional database a task targets.
    pub(crate) fn resolve_target(&self, task: &Task) -> DbflowResult<(Instance, Option<Database>)> {
        let instance = self
            .instances
            .find(&InstanceFind::by_id(task.instance_id))
            .with_context(|| format!("failed to find instance for task {}", task.id))?;
        let database = match task.database_id {
            Some(id) => Some(
                self.databases
                    .find(&DatabaseFind::by_id(id))
                    .with_context(|| format!("failed to find database for task {}", task.id))?,
            ),
            None => None,
        };
        Ok((instance, database))
    }

    /// Run `f` with an admin driver, closing it on every exit path.
    pub(crate) async fn with_driver<T, F, Fut>(
        &self,
        instance: &Instance,
        database_name: Option<&str>,
        f: F,
    ) -> DbflowResult<T>
    where
        F: FnOnce(Arc<dyn Driver>) -> Fut,
        Fut: Future<Output = DbflowResult<T>>,
    {
        let driver: Arc<dyn Driver> = Arc::from(
            self.drivers
                .admin_driver(instance, database_name)
                .await
                .map_err(|e| {
                    DbflowError::Driver(format!(
                        "failed to open driver for instance {:?}: {}",
                        instance.name, e
                    ))
                })?,
        );

        let result = f(driver.clone()).await;
        if let Err(e) = driver.close().await {
            tracing::warn!(instance = %instance.name, error = %e, "Failed to close driver");
        }
        result
    }
}

/// Executors selected by [`TaskType`].
pub enum Executor {
    General(GeneralExecutor),
    Migration(MigrationExecutor),
    Sync(SyncExecutor),
    Backup(BackupExecutor),
    #[cfg(test)]
    Scripted(ScriptedExecutor),
}

impl Executor {
    pub fn task_type(&self) -> TaskType {
        match self {
            Executor::General(_) => TaskType::General,
            Executor::Migration(_) => TaskType::Migration,
            Executor::Sync(_) => TaskType::Sync,
            Executor::Backup(_) => TaskType::Backup,
            #[cfg(test)]
            Executor::Scripted(e) => e.task_type(),
        }
    }
}

#[async_trait]
impl TaskExecutor for Executor {
    async fn run_once(&self, ctx: &RunContext, task: &Task) -> DbflowResult<RunOnceOutcome> {
        match self {
            Executor::General(e) => e.run_once(ctx, task).await,
            Executor::Migration(e) => e.run_once(ctx, task).await,
            Executor::Sync(e) => e.run_once(ctx, task).await,
            Executor::Backup(e) => e.run_once(ctx, task).await,
            #[cfg(test)]
            Executor::Scripted(e) => e.run_once(ctx, task).await,
        }
    }
}

/// One executor per task type.
pub struct ExecutorRegistry {
    general: Executor,
    migration: Executor,
    sync: Executor,
    backup: Executor,
}

impl ExecutorRegistry {
    pub fn new(env: ExecutorEnv) -> Self {
        Self {
            general: Executor::General(GeneralExecutor),
            migration: Executor::Migration(MigrationExecutor::new(env.clone())),
            sync: Executor::Sync(SyncExecutor::new(env.clone())),
            backup: Executor::Backup(BackupExecutor::new(env)),
        }
    }

    pub fn get(&self, task_type: TaskType) -> &Executor {
        match task_type {
            TaskType::General => &self.general,
            TaskType::Migration => &self.migration,
            TaskType::Sync => &self.sync,
            TaskType::Backup => &self.backup,
        }
    }

    /// Swap in `executor` for its task type.
    #[cfg(test)]
    pub(crate) fn replace(&mut self, executor: Executor) {
        let slot = match executor.task_type() {
            TaskType::General => &mut self.general,
            TaskType::Migration => &mut self.migration,
            TaskType::Sync => &mut self.sync,
            TaskType::Backup => &mut self.backup,
        };
        *slot = executor;
    }
}

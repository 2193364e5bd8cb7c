//! Task scheduler.
//!
//! A polling loop that dispatches runnable tasks to executors and persists
//! the resulting transitions.
//!
//! ## Architecture
//!
//! ```text
//! tick → pick PENDING tasks of each open pipeline's active stage
//!      → skip busy (instance, database) targets
//!      → PENDING → RUNNING, new task run      (persisted before dispatch)
//!      → tokio::spawn(executor.run_once)
//!      → DONE / FAILED / progressing          (persisted by the worker)
//!      → pipeline DONE once every stage is done
//! ```
//!
//! **Slots**: every task with a live run in this process owns a slot holding
//! the run's cancellation sender and, while `run_once` executes, its join
//! handle. A slot that is not executing is a progressing run waiting for the
//! next tick. Slots count against `max_concurrent_tasks`.

mod metrics;
mod progress;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use dbflow_shared::errors::{DbflowError, DbflowResult, ResultExt};

use crate::api::{
    PipelineFind, PipelineStatus, SYSTEM_BOT_ID, StageFind, Task, TaskFind,
    TaskPatch, TaskRunCreate, TaskRunFind, TaskRunPatch, TaskRunResult, TaskRunStatus, TaskStatus,
};
use crate::db::Stores;
use crate::executor::{ExecutorRegistry, RunContext, RunOnceOutcome, TaskExecutor};

pub use metrics::{SchedulerMetrics, SchedulerMetricsStorage};
pub use progress::{active_stage, pipeline_done, stage_status};

/// How long past `task_timeout` a worker is awaited before it is dropped.
const TIMEOUT_GRACE: Duration = Duration::from_secs(30);

/// Target key: (instance, database).
type Target = (i64, Option<i64>);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub max_concurrent_tasks: usize,
    pub task_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_concurrent_tasks: 8,
            task_timeout: Duration::from_secs(60 * 60),
        }
    }
}

struct RunSlot {
    task_run_id: i64,
    target: Target,
    cancel: watch::Sender<bool>,
    /// `run_once` is in flight.
    executing: bool,
    /// Taken by [`Scheduler::drain`].
    worker: Option<JoinHandle<()>>,
}

impl RunSlot {
    fn new(task_run_id: i64, target: Target) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            task_run_id,
            target,
            cancel,
            executing: false,
            worker: None,
        }
    }
}

struct SchedulerInner {
    stores: Stores,
    executors: ExecutorRegistry,
    config: SchedulerConfig,
    slots: Mutex<HashMap<i64, RunSlot>>,
    metrics: SchedulerMetricsStorage,
}

/// Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

enum CancelAction {
    /// `run_once` is executing and will observe the signal.
    Signalled,
    /// A progressing run between ticks.
    Idle(i64),
    /// No live run in this process.
    Orphan,
}

impl Scheduler {
    pub fn new(stores: Stores, executors: ExecutorRegistry, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                stores,
                executors,
                config,
                slots: Mutex::new(HashMap::new()),
                metrics: SchedulerMetricsStorage::new(),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.inner.metrics.snapshot()
    }

    /// Tasks with a live run in this process.
    pub fn live_runs(&self) -> usize {
        self.inner.slots.lock().len()
    }

    // ========================================================================
    // POLL LOOP
    // ========================================================================

    /// Reconcile, then tick every `poll_interval` until `shutdown` flips to
    /// `true`. Waits for in-flight workers before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> DbflowResult<()> {
        let reconciled = self.reconcile()?;
        tracing::info!(
            reconciled,
            poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            max_concurrent_tasks = self.inner.config.max_concurrent_tasks,
            "Scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "Scheduler tick failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.inner.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.drain().await;
        tracing::info!("Scheduler stopped");
        Ok(())
    }

    /// Wait for every executing worker to finish.
    pub async fn drain(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .inner
            .slots
            .lock()
            .values_mut()
            .filter_map(|slot| slot.worker.take())
            .collect();
        if handles.is_empty() {
            return;
        }

        tracing::debug!(workers = handles.len(), "Waiting for workers");
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker panicked");
            }
        }
    }

    /// One scheduling pass. Returns the number of new runs dispatched.
    pub async fn tick(&self) -> DbflowResult<usize> {
        SchedulerMetricsStorage::incr(&self.inner.metrics.ticks);
        let stores = &self.inner.stores;

        self.resume_progressing()?;

        let mut busy: HashSet<Target> = stores
            .tasks
            .find_list(&TaskFind::by_status(TaskStatus::Running))
            .context("failed to list running tasks")?
            .iter()
            .map(Task::target)
            .collect();
        // A canceled run keeps its target until the executor returns.
        busy.extend(self.inner.slots.lock().values().map(|slot| slot.target));

        let pipelines = stores
            .pipelines
            .find_list(&PipelineFind {
                status: Some(PipelineStatus::Open),
                ..Default::default()
            })
            .context("failed to list open pipelines")?;

        let mut dispatched = 0;
        'pipelines: for pipeline in pipelines {
            let stages = stores.stages.find_list(&StageFind::by_pipeline(pipeline.id))?;
            let tasks = stores.tasks.find_list(&TaskFind {
                pipeline_id: Some(pipeline.id),
                ..Default::default()
            })?;

            if pipeline_done(&stages, &tasks) {
                self.mark_pipeline_done(pipeline.id)?;
                continue;
            }
            let Some(stage) = active_stage(&stages, &tasks) else {
                continue;
            };

            for task in tasks
                .iter()
                .filter(|t| t.stage_id == stage.id && t.status == TaskStatus::Pending)
            {
                if self.live_runs() >= self.inner.config.max_concurrent_tasks {
                    tracing::debug!("Concurrency ceiling reached");
                    break 'pipelines;
                }
                if busy.contains(&task.target()) {
                    tracing::debug!(task_id = task.id, "Target busy, skip");
                    continue;
                }

                match self.dispatch(task) {
                    Ok(()) => {
                        busy.insert(task.target());
                        dispatched += 1;
                    }
                    Err(e @ (DbflowError::Conflict(_) | DbflowError::InvalidState(_))) => {
                        tracing::debug!(task_id = task.id, error = %e, "Task taken, skip");
                    }
                    Err(e) => {
                        tracing::error!(task_id = task.id, error = %e, "Failed to dispatch task");
                    }
                }
            }
        }

        Ok(dispatched)
    }

    /// PENDING → RUNNING, create the run, spawn the worker.
    fn dispatch(&self, task: &Task) -> DbflowResult<()> {
        let stores = &self.inner.stores;
        let task = stores.tasks.transition(
            task.id,
            SYSTEM_BOT_ID,
            &[TaskStatus::Pending],
            TaskStatus::Running,
        )?;

        let run = match self.create_run(&task) {
            Ok(run) => run,
            Err(e) => {
                if let Err(revert) = stores
                    .tasks
                    .patch(&TaskPatch::status(task.id, SYSTEM_BOT_ID, TaskStatus::Pending))
                {
                    tracing::error!(task_id = task.id, error = %revert, "Failed to revert task");
                }
                return Err(e);
            }
        };

        tracing::info!(
            task_id = task.id,
            task_run_id = run,
            task_type = %task.task_type,
            "Dispatching task"
        );
        self.spawn(task, run);
        Ok(())
    }

    fn create_run(&self, task: &Task) -> DbflowResult<i64> {
        let run = self
            .inner
            .stores
            .task_runs
            .create(&TaskRunCreate {
                creator_id: SYSTEM_BOT_ID,
                task_id: task.id,
                name: format!("{} {}", task.name, Utc::now().timestamp()),
            })
            .with_context(|| format!("failed to create task run for task {}", task.id))?;
        Ok(run.id)
    }

    /// Re-invoke `run_once` for runs that reported `terminated = false`.
    fn resume_progressing(&self) -> DbflowResult<()> {
        let idle: Vec<i64> = self
            .inner
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| !slot.executing)
            .map(|(task_id, _)| *task_id)
            .collect();

        for task_id in idle {
            let task = self.inner.stores.tasks.find(&TaskFind::by_id(task_id))?;
            let Some(run_id) = self.inner.slots.lock().get(&task_id).map(|s| s.task_run_id) else {
                continue;
            };
            if task.status != TaskStatus::Running {
                self.inner.slots.lock().remove(&task_id);
                self.finish_run(run_id, TaskRunStatus::Canceled, None, "Task is no longer running")?;
                continue;
            }
            tracing::debug!(task_id, task_run_id = run_id, "Resuming task run");
            self.spawn(task, run_id);
        }
        Ok(())
    }

    fn spawn(&self, task: Task, task_run_id: i64) {
        let mut slots = self.inner.slots.lock();
        let slot = slots
            .entry(task.id)
            .or_insert_with(|| RunSlot::new(task_run_id, task.target()));
        let ctx = RunContext::new(task_run_id, slot.cancel.subscribe())
            .with_timeout(self.inner.config.task_timeout);

        let scheduler = self.clone();
        slot.executing = true;
        slot.worker = Some(tokio::spawn(async move {
            scheduler.work(task, ctx).await;
        }));
        SchedulerMetricsStorage::incr(&self.inner.metrics.runs_dispatched);
    }

    async fn work(&self, task: Task, ctx: RunContext) {
        let executor = self.inner.executors.get(task.task_type);
        // The context carries the real deadline. This only catches executors
        // that never reach a `check` or `guard`.
        let backstop = self.inner.config.task_timeout + TIMEOUT_GRACE;
        let outcome = match tokio::time::timeout(backstop, executor.run_once(&ctx, &task)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(task_id = task.id, "Executor overran its deadline, abandoned");
                Err(DbflowError::Timeout(format!(
                    "task {} did not finish within {}s",
                    task.id,
                    backstop.as_secs()
                )))
            }
        };

        if let Err(e) = self.complete(&task, &ctx, outcome) {
            tracing::error!(task_id = task.id, error = %e, "Failed to record task outcome");
        }
    }

    // ========================================================================
    // COMPLETION
    // ========================================================================

    fn complete(
        &self,
        task: &Task,
        ctx: &RunContext,
        outcome: DbflowResult<RunOnceOutcome>,
    ) -> DbflowResult<()> {
        let run_id = ctx.task_run_id();

        if !ctx.is_cancelled() {
            if let Ok((false, _)) = &outcome {
                tracing::debug!(task_id = task.id, task_run_id = run_id, "Task run progressing");
                if let Some(slot) = self.inner.slots.lock().get_mut(&task.id) {
                    slot.executing = false;
                    slot.worker = None;
                }
                return Ok(());
            }
        }

        let recorded = self.record_outcome(task, ctx, outcome);
        self.inner.slots.lock().remove(&task.id);
        recorded?;
        self.refresh_pipeline(task.pipeline_id)
    }

    fn record_outcome(
        &self,
        task: &Task,
        ctx: &RunContext,
        outcome: DbflowResult<RunOnceOutcome>,
    ) -> DbflowResult<()> {
        let run_id = ctx.task_run_id();
        let metrics = &self.inner.metrics;

        if ctx.is_cancelled() {
            let result = outcome.ok().and_then(|(_, result)| result);
            self.finish_run(run_id, TaskRunStatus::Canceled, result, "Canceled by operator")?;
            SchedulerMetricsStorage::incr(&metrics.runs_canceled);
            tracing::info!(task_id = task.id, task_run_id = run_id, "Task run canceled");
            return Ok(());
        }

        let (task_status, run_status, result, comment) = match outcome {
            Ok((_, result)) => (TaskStatus::Done, TaskRunStatus::Done, result, String::new()),
            Err(e) => (
                TaskStatus::Failed,
                TaskRunStatus::Failed,
                None,
                e.to_string(),
            ),
        };

        match self.inner.stores.tasks.transition(
            task.id,
            SYSTEM_BOT_ID,
            &[TaskStatus::Running],
            task_status,
        ) {
            Ok(_) => {}
            Err(DbflowError::InvalidState(_)) => {
                // Canceled between the executor returning and this write.
                self.finish_run(run_id, TaskRunStatus::Canceled, result, "Canceled by operator")?;
                SchedulerMetricsStorage::incr(&metrics.runs_canceled);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.finish_run(run_id, run_status, result, &comment)?;

        match run_status {
            TaskRunStatus::Done => {
                SchedulerMetricsStorage::incr(&metrics.runs_succeeded);
                tracing::info!(task_id = task.id, task_run_id = run_id, "Task done");
            }
            _ => {
                SchedulerMetricsStorage::incr(&metrics.runs_failed);
                tracing::warn!(task_id = task.id, task_run_id = run_id, error = %comment, "Task failed");
            }
        }
        Ok(())
    }

    fn finish_run(
        &self,
        task_run_id: i64,
        status: TaskRunStatus,
        result: Option<TaskRunResult>,
        comment: &str,
    ) -> DbflowResult<()> {
        self.inner
            .stores
            .task_runs
            .patch(&TaskRunPatch {
                id: task_run_id,
                updater_id: SYSTEM_BOT_ID,
                status,
                result,
                comment: Some(comment.to_string()),
            })
            .with_context(|| format!("failed to finish task run {task_run_id}"))?;
        Ok(())
    }

    /// Mark the pipeline DONE if every stage is done.
    fn refresh_pipeline(&self, pipeline_id: i64) -> DbflowResult<()> {
        let stores = &self.inner.stores;
        let pipeline = stores.pipelines.find(&PipelineFind::by_id(pipeline_id))?;
        if pipeline.status != PipelineStatus::Open {
            return Ok(());
        }
        let stages = stores.stages.find_list(&StageFind::by_pipeline(pipeline_id))?;
        let tasks = stores.tasks.find_list(&TaskFind {
            pipeline_id: Some(pipeline_id),
            ..Default::default()
        })?;
        if pipeline_done(&stages, &tasks) {
            self.mark_pipeline_done(pipeline_id)?;
        }
        Ok(())
    }

    fn mark_pipeline_done(&self, pipeline_id: i64) -> DbflowResult<()> {
        match self.inner.stores.pipelines.transition(
            pipeline_id,
            SYSTEM_BOT_ID,
            PipelineStatus::Done,
        ) {
            Ok(_) => {
                tracing::info!(pipeline_id, "Pipeline done");
                Ok(())
            }
            Err(DbflowError::InvalidState(msg)) => {
                // Canceled by an operator since it was read.
                tracing::debug!(pipeline_id, %msg, "Pipeline already closed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // OPERATOR ACTIONS
    // ========================================================================

    /// PENDING_APPROVAL → PENDING.
    pub fn approve_task(&self, task_id: i64, updater_id: i64) -> DbflowResult<Task> {
        let task = self
            .inner
            .stores
            .tasks
            .transition(
                task_id,
                updater_id,
                &[TaskStatus::PendingApproval],
                TaskStatus::Pending,
            )
            .with_context(|| format!("failed to approve task {task_id}"))?;
        tracing::info!(task_id, updater_id, "Task approved");
        Ok(task)
    }

    /// Move a non-terminal task to CANCELED.
    ///
    /// A running `run_once` is signalled and its run is marked CANCELED when
    /// it returns.
    pub fn cancel_task(&self, task_id: i64, updater_id: i64) -> DbflowResult<Task> {
        let stores = &self.inner.stores;
        let current = stores.tasks.find(&TaskFind::by_id(task_id))?;
        if current.status.is_terminal() {
            return Err(DbflowError::InvalidState(format!(
                "task {task_id} is already {}",
                current.status
            )));
        }
        let task = stores
            .tasks
            .transition(task_id, updater_id, &[current.status], TaskStatus::Canceled)
            .with_context(|| format!("failed to cancel task {task_id}"))?;
        tracing::info!(task_id, updater_id, from = %current.status, "Task canceled");

        if current.status != TaskStatus::Running {
            return Ok(task);
        }

        let action = {
            let mut slots = self.inner.slots.lock();
            match slots.get(&task_id).map(|slot| slot.executing) {
                Some(true) => {
                    if let Some(slot) = slots.get(&task_id) {
                        slot.cancel.send_replace(true);
                    }
                    CancelAction::Signalled
                }
                Some(false) => match slots.remove(&task_id) {
                    Some(slot) => CancelAction::Idle(slot.task_run_id),
                    None => CancelAction::Orphan,
                },
                None => CancelAction::Orphan,
            }
        };

        match action {
            CancelAction::Signalled => {}
            CancelAction::Idle(run_id) => {
                self.finish_run(run_id, TaskRunStatus::Canceled, None, "Canceled by operator")?;
                SchedulerMetricsStorage::incr(&self.inner.metrics.runs_canceled);
            }
            CancelAction::Orphan => {
                for run in stores.task_runs.find_list(&TaskRunFind::running_for(task_id))? {
                    self.finish_run(run.id, TaskRunStatus::Canceled, None, "Canceled by operator")?;
                }
            }
        }
        Ok(task)
    }

    /// FAILED → RUNNING with a new attempt, executed on the next tick.
    pub fn retry_task(&self, task_id: i64, updater_id: i64) -> DbflowResult<Task> {
        let stores = &self.inner.stores;
        let task = stores
            .tasks
            .transition(task_id, updater_id, &[TaskStatus::Failed], TaskStatus::Running)
            .with_context(|| format!("failed to retry task {task_id}"))?;

        let run_id = match self.create_run(&task) {
            Ok(run_id) => run_id,
            Err(e) => {
                if let Err(revert) = stores
                    .tasks
                    .patch(&TaskPatch::status(task_id, updater_id, TaskStatus::Failed))
                {
                    tracing::error!(task_id, error = %revert, "Failed to revert task");
                }
                return Err(e);
            }
        };

        self.inner
            .slots
            .lock()
            .insert(task_id, RunSlot::new(run_id, task.target()));
        tracing::info!(task_id, task_run_id = run_id, updater_id, "Task retry scheduled");
        Ok(task)
    }

    /// Cancel the pipeline and every non-terminal task in it.
    ///
    /// The pipeline is closed first, so a task finishing concurrently can no
    /// longer mark it DONE.
    pub fn cancel_pipeline(&self, pipeline_id: i64, updater_id: i64) -> DbflowResult<()> {
        let stores = &self.inner.stores;
        stores
            .pipelines
            .transition(pipeline_id, updater_id, PipelineStatus::Canceled)
            .with_context(|| format!("failed to cancel pipeline {pipeline_id}"))?;

        let tasks = stores.tasks.find_list(&TaskFind {
            pipeline_id: Some(pipeline_id),
            ..Default::default()
        })?;
        for task in tasks.iter().filter(|t| !t.status.is_terminal()) {
            match self.cancel_task(task.id, updater_id) {
                Ok(_) => {}
                Err(DbflowError::InvalidState(msg)) => {
                    tracing::debug!(task_id = task.id, %msg, "Task finished before cancel");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(pipeline_id, updater_id, "Pipeline canceled");
        Ok(())
    }

    /// Fail runs left RUNNING by a process that is gone.
    ///
    /// A RUNNING task or run without a slot in this process has no worker
    /// that will ever finish it. Returns the number of tasks failed.
    pub fn reconcile(&self) -> DbflowResult<usize> {
        let stores = &self.inner.stores;
        let live: HashSet<i64> = self.inner.slots.lock().keys().copied().collect();

        let runs = stores.task_runs.find_list(&TaskRunFind {
            statuses: Some(vec![TaskRunStatus::Running]),
            ..Default::default()
        })?;
        for run in runs.iter().filter(|r| !live.contains(&r.task_id)) {
            self.finish_run(
                run.id,
                TaskRunStatus::Failed,
                None,
                "Interrupted: the process running this task stopped",
            )?;
        }

        let mut failed = 0;
        let tasks = stores
            .tasks
            .find_list(&TaskFind::by_status(TaskStatus::Running))?;
        for task in tasks.iter().filter(|t| !live.contains(&t.id)) {
            match stores.tasks.transition(
                task.id,
                SYSTEM_BOT_ID,
                &[TaskStatus::Running],
                TaskStatus::Failed,
            ) {
                Ok(_) => {
                    failed += 1;
                    tracing::warn!(task_id = task.id, "Failed orphaned running task");
                }
                Err(DbflowError::InvalidState(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(failed)
    }
}

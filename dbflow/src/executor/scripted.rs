//! Executor that replays queued outcomes, for driving the scheduler in tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use dbflow_shared::errors::DbflowResult;

use super::{RunContext, RunOnceOutcome, TaskExecutor};
use crate::api::{Task, TaskType};

/// Pops one queued outcome per `run_once`. An empty queue means done.
///
/// Clones share the queue and the call count.
#[derive(Clone)]
pub struct ScriptedExecutor {
    task_type: TaskType,
    script: Arc<Mutex<VecDeque<DbflowResult<RunOnceOutcome>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedExecutor {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn push(&self, outcome: DbflowResult<RunOnceOutcome>) {
        self.script.lock().push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn run_once(&self, ctx: &RunContext, task: &Task) -> DbflowResult<RunOnceOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ctx.check()?;
        tracing::debug!(task_id = task.id, "Run scripted step");
        self.script.lock().pop_front().unwrap_or(Ok((true, None)))
    }
}

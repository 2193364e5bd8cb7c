//! Task run persistence.
//!
//! Runs are append-only history: one row per attempt, never deleted.

use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, Transaction};

use dbflow_shared::errors::{DbflowError, DbflowResult};

use super::{
    CacheService, Database, SqlArgs, collect_rows, db_err, expect_one, now_ts, parse_column,
};
use crate::api::{TaskRun, TaskRunCreate, TaskRunFind, TaskRunPatch, TaskRunResult, TaskRunStatus};

const TASK_RUN_COLUMNS: &str = "id, creator_id, created_ts, updater_id, updated_ts, task_id, \
     attempt, name, status, result, comment, started_ts, ended_ts";

#[derive(Clone)]
pub struct TaskRunStore {
    db: Database,
    cache: CacheService,
}

impl TaskRunStore {
    pub fn new(db: Database, cache: CacheService) -> Self {
        Self { db, cache }
    }

    /// Start a new attempt in `RUNNING` status.
    ///
    /// The attempt number is one past the task's previous highest. Fails with
    /// `Conflict` if the task already has a running attempt.
    pub fn create(&self, create: &TaskRunCreate) -> DbflowResult<TaskRun> {
        let run = self.db.write_cached(&self.cache, |tx| insert_task_run(tx, create))?;

        tracing::debug!(
            task_run_id = run.id,
            task_id = run.task_id,
            attempt = run.attempt,
            "Created task run"
        );
        Ok(run)
    }

    /// Runs matching `find`, oldest attempt first.
    pub fn find_list(&self, find: &TaskRunFind) -> DbflowResult<Vec<TaskRun>> {
        self.db.read_cached(&self.cache, |tx| list_task_runs(tx, find))
    }

    pub fn find(&self, find: &TaskRunFind) -> DbflowResult<TaskRun> {
        if let Some(id) = find.id.filter(|_| find.is_id_only()) {
            if let Some(run) = self.cache.find::<TaskRun>(id)? {
                return Ok(run);
            }
        }

        let list = self.db.read_cached(&self.cache, |tx| list_task_runs(tx, find))?;
        expect_one(list, "task run", find)
    }

    pub fn patch(&self, patch: &TaskRunPatch) -> DbflowResult<TaskRun> {
        self.db.write_cached(&self.cache, |tx| update_task_run(tx, patch))
    }
}

fn map_task_run(row: &Row<'_>) -> rusqlite::Result<TaskRun> {
    let status: String = row.get(8)?;
    let result: Option<String> = row.get(9)?;
    let result = match result {
        Some(raw) => Some(serde_json::from_str::<TaskRunResult>(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, e.into())
        })?),
        None => None,
    };

    Ok(TaskRun {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        created_ts: row.get(2)?,
        updater_id: row.get(3)?,
        updated_ts: row.get(4)?,
        task_id: row.get(5)?,
        attempt: row.get(6)?,
        name: row.get(7)?,
        status: parse_column(8, &status, TaskRunStatus::parse)?,
        result,
        comment: row.get(10)?,
        started_ts: row.get(11)?,
        ended_ts: row.get(12)?,
    })
}

fn insert_task_run(tx: &Transaction<'_>, create: &TaskRunCreate) -> DbflowResult<TaskRun> {
    db_err!(tx.query_row(
        &format!(
            "INSERT INTO task_run (creator_id, updater_id, task_id, attempt, name, status)
             VALUES (
                ?1, ?1, ?2,
                (SELECT COALESCE(MAX(attempt), 0) + 1 FROM task_run WHERE task_id = ?2),
                ?3, ?4
             )
             RETURNING {TASK_RUN_COLUMNS}"
        ),
        rusqlite::params![
            create.creator_id,
            create.task_id,
            create.name,
            TaskRunStatus::Running.as_str(),
        ],
        map_task_run,
    ))
}

fn list_task_runs(tx: &Transaction<'_>, find: &TaskRunFind) -> DbflowResult<Vec<TaskRun>> {
    let mut args = SqlArgs::new();
    if let Some(id) = find.id {
        args.push("id = ?", id);
    }
    if let Some(task_id) = find.task_id {
        args.push("task_id = ?", task_id);
    }
    if let Some(statuses) = &find.statuses {
        args.push_in(
            "status",
            statuses
                .iter()
                .map(|s| Value::from(s.as_str().to_string())),
        );
    }

    let mut stmt = db_err!(tx.prepare(&format!(
        "SELECT {TASK_RUN_COLUMNS} FROM task_run WHERE {} ORDER BY task_id, attempt",
        args.where_clause()
    )))?;
    let rows = db_err!(stmt.query_map(args.params(), map_task_run))?;
    collect_rows(rows)
}

fn update_task_run(tx: &Transaction<'_>, patch: &TaskRunPatch) -> DbflowResult<TaskRun> {
    let now = now_ts();
    let mut set = SqlArgs::new();
    set.push("updater_id = ?", patch.updater_id);
    set.push("updated_ts = ?", now);
    set.push("status = ?", patch.status.as_str().to_string());
    if patch.status != TaskRunStatus::Running {
        set.push("ended_ts = ?", now);
    }
    if let Some(result) = &patch.result {
        set.push("result = ?", serde_json::to_string(result)?);
    }
    if let Some(comment) = &patch.comment {
        set.push("comment = ?", comment.clone());
    }
    set.bind(patch.id);

    db_err!(
        tx.query_row(
            &format!(
                "UPDATE task_run SET {} WHERE id = ? RETURNING {TASK_RUN_COLUMNS}",
                set.set_clause()
            ),
            set.params(),
            map_task_run,
        )
        .optional()
    )?
    .ok_or_else(|| DbflowError::NotFound(format!("task run ID not found: {}", patch.id)))
}

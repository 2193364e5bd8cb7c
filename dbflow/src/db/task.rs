//! Task persistence.

use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, Transaction};

use dbflow_shared::errors::{DbflowError, DbflowResult};

use super::{
    CacheService, Database, SqlArgs, collect_rows, db_err, expect_one, now_ts, parse_column,
};
use crate::api::{Task, TaskCreate, TaskFind, TaskPatch, TaskStatus, TaskType};

const TASK_COLUMNS: &str = "id, creator_id, created_ts, updater_id, updated_ts, pipeline_id, \
     stage_id, instance_id, database_id, name, status, type, payload";

#[derive(Clone)]
pub struct TaskStore {
    db: Database,
    cache: CacheService,
}

impl TaskStore {
    pub fn new(db: Database, cache: CacheService) -> Self {
        Self { db, cache }
    }

    pub fn create(&self, create: &TaskCreate) -> DbflowResult<Task> {
        let task = self.db.write_cached(&self.cache, |tx| insert_task(tx, create))?;

        tracing::debug!(
            task_id = task.id,
            stage_id = task.stage_id,
            task_type = %task.task_type,
            status = %task.status,
            "Created task"
        );
        Ok(task)
    }

    pub fn find_list(&self, find: &TaskFind) -> DbflowResult<Vec<Task>> {
        self.db.read_cached(&self.cache, |tx| list_tasks(tx, find))
    }

    pub fn find(&self, find: &TaskFind) -> DbflowResult<Task> {
        if let Some(id) = find.id.filter(|_| find.is_id_only()) {
            if let Some(task) = self.cache.find::<Task>(id)? {
                return Ok(task);
            }
        }

        let list = self.db.read_cached(&self.cache, |tx| list_tasks(tx, find))?;
        expect_one(list, "task", find)
    }

    /// Update a task by id.
    ///
    /// Moving a task to `RUNNING` while another task on the same
    /// (instance, database) is running fails with `Conflict`.
    pub fn patch(&self, patch: &TaskPatch) -> DbflowResult<Task> {
        let task = self.db.write_cached(&self.cache, |tx| update_task(tx, patch))?;
        Ok(task)
    }

    /// Move a task from `from` to `to` only if it is still in `from`.
    ///
    /// Returns `InvalidState` if another writer moved it first. This is the
    /// compare-and-set the scheduler uses so two pollers can never both
    /// dispatch the same task.
    pub fn transition(
        &self,
        id: i64,
        updater_id: i64,
        from: &[TaskStatus],
        to: TaskStatus,
    ) -> DbflowResult<Task> {
        let task = self.db.write_cached(&self.cache, |tx| {
            let current = list_tasks(tx, &TaskFind::by_id(id))?;
            let current = expect_one(current, "task", &id)?;
            if !from.contains(&current.status) || !current.status.can_transition_to(to) {
                return Err(DbflowError::InvalidState(format!(
                    "task {} cannot move from {} to {}",
                    id, current.status, to
                )));
            }
            update_task(tx, &TaskPatch::status(id, updater_id, to))
        })?;
        Ok(task)
    }
}

fn map_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(10)?;
    let task_type: String = row.get(11)?;
    Ok(Task {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        created_ts: row.get(2)?,
        updater_id: row.get(3)?,
        updated_ts: row.get(4)?,
        pipeline_id: row.get(5)?,
        stage_id: row.get(6)?,
        instance_id: row.get(7)?,
        database_id: row.get(8)?,
        name: row.get(9)?,
        status: parse_column(10, &status, TaskStatus::parse)?,
        task_type: parse_column(11, &task_type, TaskType::parse)?,
        payload: row.get(12)?,
    })
}

fn insert_task(tx: &Transaction<'_>, create: &TaskCreate) -> DbflowResult<Task> {
    db_err!(tx.query_row(
        &format!(
            "INSERT INTO task (creator_id, updater_id, pipeline_id, stage_id, instance_id,
                               database_id, name, status, type, payload)
             VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             RETURNING {TASK_COLUMNS}"
        ),
        rusqlite::params![
            create.creator_id,
            create.pipeline_id,
            create.stage_id,
            create.instance_id,
            create.database_id,
            create.name,
            create.status.as_str(),
            create.task_type.as_str(),
            create.payload,
        ],
        map_task,
    ))
}

fn list_tasks(tx: &Transaction<'_>, find: &TaskFind) -> DbflowResult<Vec<Task>> {
    let mut args = SqlArgs::new();
    if let Some(id) = find.id {
        args.push("id = ?", id);
    }
    if let Some(pipeline_id) = find.pipeline_id {
        args.push("pipeline_id = ?", pipeline_id);
    }
    if let Some(stage_id) = find.stage_id {
        args.push("stage_id = ?", stage_id);
    }
    if let Some(statuses) = &find.statuses {
        args.push_in(
            "status",
            statuses
                .iter()
                .map(|s| Value::from(s.as_str().to_string())),
        );
    }
    if let Some(instance_id) = find.instance_id {
        args.push("instance_id = ?", instance_id);
    }
    if let Some(database_id) = find.database_id {
        args.push("database_id = ?", database_id);
    }

    let mut stmt = db_err!(tx.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM task WHERE {} ORDER BY id",
        args.where_clause()
    )))?;
    let rows = db_err!(stmt.query_map(args.params(), map_task))?;
    collect_rows(rows)
}

fn update_task(tx: &Transaction<'_>, patch: &TaskPatch) -> DbflowResult<Task> {
    let mut set = SqlArgs::new();
    set.push("updater_id = ?", patch.updater_id);
    set.push("updated_ts = ?", now_ts());
    if let Some(status) = patch.status {
        set.push("status = ?", status.as_str().to_string());
    }
    if let Some(payload) = &patch.payload {
        set.push("payload = ?", payload.clone());
    }
    set.bind(patch.id);

    db_err!(
        tx.query_row(
            &format!(
                "UPDATE task SET {} WHERE id = ? RETURNING {TASK_COLUMNS}",
                set.set_clause()
            ),
            set.params(),
            map_task,
        )
        .optional()
    )?
    .ok_or_else(|| DbflowError::NotFound(format!("task ID not found: {}", patch.id)))
}

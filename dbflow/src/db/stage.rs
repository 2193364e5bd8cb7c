//! Stage persistence.

use rusqlite::{OptionalExtension, Row, Transaction};

use dbflow_shared::errors::{DbflowError, DbflowResult};

use super::{CacheService, Database, SqlArgs, collect_rows, db_err, expect_one, now_ts};
use crate::api::{Stage, StageCreate, StageFind, StagePatch};

const STAGE_COLUMNS: &str =
    "id, creator_id, created_ts, updater_id, updated_ts, pipeline_id, position, name";

#[derive(Clone)]
pub struct StageStore {
    db: Database,
    cache: CacheService,
}

impl StageStore {
    pub fn new(db: Database, cache: CacheService) -> Self {
        Self { db, cache }
    }

    /// Append a stage to its pipeline.
    ///
    /// The position is assigned inside the insert transaction as one past the
    /// pipeline's current maximum, so ordinals are unique and strictly
    /// increasing in creation order.
    pub fn create(&self, create: &StageCreate) -> DbflowResult<Stage> {
        let stage = self.db.write_cached(&self.cache, |tx| insert_stage(tx, create))?;

        tracing::debug!(
            stage_id = stage.id,
            pipeline_id = stage.pipeline_id,
            position = stage.position,
            "Created stage"
        );
        Ok(stage)
    }

    /// Stages matching `find`, ordered by pipeline then position.
    pub fn find_list(&self, find: &StageFind) -> DbflowResult<Vec<Stage>> {
        self.db.read_cached(&self.cache, |tx| list_stages(tx, find))
    }

    pub fn find(&self, find: &StageFind) -> DbflowResult<Stage> {
        if let Some(id) = find.id.filter(|_| find.is_id_only()) {
            if let Some(stage) = self.cache.find::<Stage>(id)? {
                return Ok(stage);
            }
        }

        let list = self.db.read_cached(&self.cache, |tx| list_stages(tx, find))?;
        expect_one(list, "stage", find)
    }

    pub fn patch(&self, patch: &StagePatch) -> DbflowResult<Stage> {
        let stage = self.db.write_cached(&self.cache, |tx| update_stage(tx, patch))?;
        Ok(stage)
    }
}

fn map_stage(row: &Row<'_>) -> rusqlite::Result<Stage> {
    Ok(Stage {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        created_ts: row.get(2)?,
        updater_id: row.get(3)?,
        updated_ts: row.get(4)?,
        pipeline_id: row.get(5)?,
        position: row.get(6)?,
        name: row.get(7)?,
    })
}

fn insert_stage(tx: &Transaction<'_>, create: &StageCreate) -> DbflowResult<Stage> {
    db_err!(tx.query_row(
        &format!(
            "INSERT INTO stage (creator_id, updater_id, pipeline_id, position, name)
             VALUES (
                ?1, ?1, ?2,
                (SELECT COALESCE(MAX(position), 0) + 1 FROM stage WHERE pipeline_id = ?2),
                ?3
             )
             RETURNING {STAGE_COLUMNS}"
        ),
        rusqlite::params![create.creator_id, create.pipeline_id, create.name],
        map_stage,
    ))
}

fn list_stages(tx: &Transaction<'_>, find: &StageFind) -> DbflowResult<Vec<Stage>> {
    let mut args = SqlArgs::new();
    if let Some(id) = find.id {
        args.push("id = ?", id);
    }
    if let Some(pipeline_id) = find.pipeline_id {
        args.push("pipeline_id = ?", pipeline_id);
    }

    let mut stmt = db_err!(tx.prepare(&format!(
        "SELECT {STAGE_COLUMNS} FROM stage WHERE {} ORDER BY pipeline_id, position",
        args.where_clause()
    )))?;
    let rows = db_err!(stmt.query_map(args.params(), map_stage))?;
    collect_rows(rows)
}

fn update_stage(tx: &Transaction<'_>, patch: &StagePatch) -> DbflowResult<Stage> {
    let mut set = SqlArgs::new();
    set.push("updater_id = ?", patch.updater_id);
    set.push("updated_ts = ?", now_ts());
    if let Some(name) = &patch.name {
        set.push("name = ?", name.clone());
    }
    set.bind(patch.id);

    db_err!(
        tx.query_row(
            &format!(
                "UPDATE stage SET {} WHERE id = ? RETURNING {STAGE_COLUMNS}",
                set.set_clause()
            ),
            set.params(),
            map_stage,
        )
        .optional()
    )?
    .ok_or_else(|| DbflowError::NotFound(format!("stage ID not found: {}", patch.id)))
}

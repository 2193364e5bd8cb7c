//! Pipeline persistence.

use rusqlite::{OptionalExtension, Row, Transaction};

use dbflow_shared::errors::{DbflowError, DbflowResult};

use super::{
    CacheService, Database, SqlArgs, collect_rows, db_err, expect_one, now_ts, parse_column,
};
use crate::api::{Pipeline, PipelineCreate, PipelineFind, PipelinePatch, PipelineStatus};

const PIPELINE_COLUMNS: &str = "id, creator_id, created_ts, updater_id, updated_ts, name, status";

/// Transactional CRUD over the `pipeline` table, cache-accelerated.
#[derive(Clone)]
pub struct PipelineStore {
    db: Database,
    cache: CacheService,
}

impl PipelineStore {
    pub fn new(db: Database, cache: CacheService) -> Self {
        Self { db, cache }
    }

    /// Create a new pipeline in `OPEN` status.
    pub fn create(&self, create: &PipelineCreate) -> DbflowResult<Pipeline> {
        let pipeline = self.db.write_cached(&self.cache, |tx| insert_pipeline(tx, create))?;

        tracing::debug!(pipeline_id = pipeline.id, name = %pipeline.name, "Created pipeline");
        Ok(pipeline)
    }

    /// Retrieve pipelines matching `find`.
    pub fn find_list(&self, find: &PipelineFind) -> DbflowResult<Vec<Pipeline>> {
        self.db.read_cached(&self.cache, |tx| list_pipelines(tx, find))
    }

    /// Retrieve exactly one pipeline.
    ///
    /// Returns `NotFound` if nothing matches, `Conflict` if several do.
    pub fn find(&self, find: &PipelineFind) -> DbflowResult<Pipeline> {
        if let Some(id) = find.id.filter(|_| find.is_id_only()) {
            if let Some(pipeline) = self.cache.find::<Pipeline>(id)? {
                return Ok(pipeline);
            }
        }

        let list = self.db.read_cached(&self.cache, |tx| list_pipelines(tx, find))?;
        expect_one(list, "pipeline", find)
    }

    /// Update an existing pipeline by id.
    ///
    /// Returns `NotFound` if the pipeline does not exist and `InvalidState`
    /// if the patch would move a `DONE` or `CANCELED` pipeline elsewhere.
    pub fn patch(&self, patch: &PipelinePatch) -> DbflowResult<Pipeline> {
        self.db.write_cached(&self.cache, |tx| {
            if let Some(to) = patch.status {
                let current = find_for_update(tx, patch.id)?;
                if current.status.is_terminal() && current.status != to {
                    return Err(DbflowError::InvalidState(format!(
                        "pipeline {} is {} and cannot move to {}",
                        patch.id, current.status, to
                    )));
                }
            }
            update_pipeline(tx, patch)
        })
    }

    /// Close an `OPEN` pipeline as `to`.
    ///
    /// Compare-and-set: returns `InvalidState` if the pipeline already left
    /// `OPEN`, so `DONE` and `CANCELED` never overwrite each other.
    pub fn transition(
        &self,
        id: i64,
        updater_id: i64,
        to: PipelineStatus,
    ) -> DbflowResult<Pipeline> {
        let pipeline = self.db.write_cached(&self.cache, |tx| {
            let current = find_for_update(tx, id)?;
            if current.status != PipelineStatus::Open || to == PipelineStatus::Open {
                return Err(DbflowError::InvalidState(format!(
                    "pipeline {} cannot move from {} to {}",
                    id, current.status, to
                )));
            }
            update_pipeline(
                tx,
                &PipelinePatch {
                    id,
                    updater_id,
                    status: Some(to),
                },
            )
        })?;

        tracing::debug!(pipeline_id = id, status = %to, "Closed pipeline");
        Ok(pipeline)
    }
}

fn map_pipeline(row: &Row<'_>) -> rusqlite::Result<Pipeline> {
    let status: String = row.get(6)?;
    Ok(Pipeline {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        created_ts: row.get(2)?,
        updater_id: row.get(3)?,
        updated_ts: row.get(4)?,
        name: row.get(5)?,
        status: parse_column(6, &status, PipelineStatus::parse)?,
    })
}

fn insert_pipeline(tx: &Transaction<'_>, create: &PipelineCreate) -> DbflowResult<Pipeline> {
    db_err!(tx.query_row(
        &format!(
            "INSERT INTO pipeline (creator_id, updater_id, name, status)
             VALUES (?1, ?2, ?3, ?4)
             RETURNING {PIPELINE_COLUMNS}"
        ),
        rusqlite::params![
            create.creator_id,
            create.creator_id,
            create.name,
            PipelineStatus::Open.as_str(),
        ],
        map_pipeline,
    ))
}

fn list_pipelines(tx: &Transaction<'_>, find: &PipelineFind) -> DbflowResult<Vec<Pipeline>> {
    let mut args = SqlArgs::new();
    if let Some(id) = find.id {
        args.push("id = ?", id);
    }
    if let Some(status) = find.status {
        args.push("status = ?", status.as_str().to_string());
    }

    let mut stmt = db_err!(tx.prepare(&format!(
        "SELECT {PIPELINE_COLUMNS} FROM pipeline WHERE {} ORDER BY id",
        args.where_clause()
    )))?;
    let rows = db_err!(stmt.query_map(args.params(), map_pipeline))?;
    collect_rows(rows)
}

fn find_for_update(tx: &Transaction<'_>, id: i64) -> DbflowResult<Pipeline> {
    list_pipelines(tx, &PipelineFind::by_id(id))?
        .into_iter()
        .next()
        .ok_or_else(|| DbflowError::NotFound(format!("pipeline ID not found: {id}")))
}

fn update_pipeline(tx: &Transaction<'_>, patch: &PipelinePatch) -> DbflowResult<Pipeline> {
    let mut set = SqlArgs::new();
    set.push("updater_id = ?", patch.updater_id);
    set.push("updated_ts = ?", now_ts());
    if let Some(status) = patch.status {
        set.push("status = ?", status.as_str().to_string());
    }
    set.bind(patch.id);

    db_err!(
        tx.query_row(
            &format!(
                "UPDATE pipeline SET {} WHERE id = ? RETURNING {PIPELINE_COLUMNS}",
                set.set_clause()
            ),
            set.params(),
            map_pipeline,
        )
        .optional()
    )?
    .ok_or_else(|| DbflowError::NotFound(format!("pipeline ID not found: {}", patch.id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PipelineStore {
        PipelineStore::new(Database::open_in_memory().unwrap(), CacheService::new())
    }

    fn create(store: &PipelineStore, name: &str) -> Pipeline {
        store
            .create(&PipelineCreate {
                creator_id: 101,
                name: name.to_string(),
            })
            .unwrap()
    }

    #[test]
    fn test_create_pipeline() {
        let store = store();
        let pipeline = create(&store, "Deploy orders schema");

        assert!(pipeline.id > 0);
        assert_eq!(pipeline.status, PipelineStatus::Open);
        assert_eq!(pipeline.creator_id, 101);
        assert_eq!(pipeline.updater_id, 101);
    }

    #[test]
    fn test_find_after_create_and_patch_matches_returned_value() {
        let store = store();
        let created = create(&store, "p");
        assert_eq!(store.find(&PipelineFind::by_id(created.id)).unwrap(), created);

        let patched = store
            .patch(&PipelinePatch {
                id: created.id,
                updater_id: 7,
                status: Some(PipelineStatus::Done),
            })
            .unwrap();
        assert_eq!(patched.status, PipelineStatus::Done);
        assert_eq!(patched.updater_id, 7);
        assert_eq!(store.find(&PipelineFind::by_id(created.id)).unwrap(), patched);
    }

    #[test]
    fn test_find_by_id_uses_cache() {
        let db = Database::open_in_memory().unwrap();
        let cache = CacheService::new();
        let store = PipelineStore::new(db.clone(), cache.clone());
        let created = create(&store, "p");

        // Bypass the store so only the cache knows the old value.
        db.conn()
            .execute("UPDATE pipeline SET name = 'renamed' WHERE id = ?1", [created.id])
            .unwrap();

        assert_eq!(store.find(&PipelineFind::by_id(created.id)).unwrap().name, "p");

        // A non-id filter goes to the store and refreshes the cache.
        let fresh = store
            .find(&PipelineFind {
                id: Some(created.id),
                status: Some(PipelineStatus::Open),
            })
            .unwrap();
        assert_eq!(fresh.name, "renamed");
        assert_eq!(cache.find::<Pipeline>(created.id).unwrap().unwrap().name, "renamed");
    }

    #[test]
    fn test_find_not_found_and_conflict() {
        let store = store();
        assert!(matches!(
            store.find(&PipelineFind::by_id(42)),
            Err(DbflowError::NotFound(_))
        ));

        create(&store, "a");
        create(&store, "b");
        let result = store.find(&PipelineFind {
            status: Some(PipelineStatus::Open),
            ..Default::default()
        });
        assert!(matches!(result, Err(DbflowError::Conflict(_))));
    }

    #[test]
    fn test_patch_missing_pipeline() {
        let store = store();
        let result = store.patch(&PipelinePatch {
            id: 99,
            updater_id: 1,
            status: Some(PipelineStatus::Canceled),
        });
        assert!(matches!(result, Err(DbflowError::NotFound(_))));
    }

    #[test]
    fn test_terminal_pipeline_never_regresses() {
        let store = store();
        let p = create(&store, "p");
        let canceled = store.transition(p.id, 7, PipelineStatus::Canceled).unwrap();
        assert_eq!(canceled.status, PipelineStatus::Canceled);
        assert_eq!(canceled.updater_id, 7);

        assert!(matches!(
            store.transition(p.id, 1, PipelineStatus::Done),
            Err(DbflowError::InvalidState(_))
        ));
        for to in [PipelineStatus::Done, PipelineStatus::Open] {
            let result = store.patch(&PipelinePatch {
                id: p.id,
                updater_id: 1,
                status: Some(to),
            });
            assert!(matches!(result, Err(DbflowError::InvalidState(_))), "{to}");
        }

        let stored = store.find(&PipelineFind::by_id(p.id)).unwrap();
        assert_eq!(stored, canceled);

        // Re-asserting the same status or touching only the updater is fine.
        let same = store
            .patch(&PipelinePatch {
                id: p.id,
                updater_id: 9,
                status: Some(PipelineStatus::Canceled),
            })
            .unwrap();
        assert_eq!(same.status, PipelineStatus::Canceled);
    }

    #[test]
    fn test_transition_requires_open_pipeline() {
        let store = store();
        let p = create(&store, "p");
        assert!(matches!(
            store.transition(p.id, 1, PipelineStatus::Open),
            Err(DbflowError::InvalidState(_))
        ));
        assert!(matches!(
            store.transition(99, 1, PipelineStatus::Done),
            Err(DbflowError::NotFound(_))
        ));

        let done = store.transition(p.id, 1, PipelineStatus::Done).unwrap();
        assert_eq!(done.status, PipelineStatus::Done);
        assert!(matches!(
            store.transition(p.id, 1, PipelineStatus::Canceled),
            Err(DbflowError::InvalidState(_))
        ));
    }

    #[test]
    fn test_find_list_by_status() {
        let store = store();
        let a = create(&store, "a");
        create(&store, "b");
        store
            .patch(&PipelinePatch {
                id: a.id,
                updater_id: 1,
                status: Some(PipelineStatus::Done),
            })
            .unwrap();

        let open = store
            .find_list(&PipelineFind {
                status: Some(PipelineStatus::Open),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].name, "b");
    }
}

//! Instance and database lookups.
//!
//! Both are reference data for the pipeline: created by whoever registers a
//! server, then only read when resolving a task's target.

use rusqlite::{Row, Transaction};

use dbflow_shared::errors::DbflowResult;

use super::{CacheService, Database as Db, SqlArgs, collect_rows, db_err, expect_one};
use crate::api::{Database, DatabaseCreate, DatabaseFind, Instance, InstanceCreate, InstanceFind};

const INSTANCE_COLUMNS: &str = "id, creator_id, created_ts, name, engine, host, port, username";
const DATABASE_COLUMNS: &str = "id, creator_id, created_ts, instance_id, name";

#[derive(Clone)]
pub struct InstanceStore {
    db: Db,
    cache: CacheService,
}

impl InstanceStore {
    pub fn new(db: Db, cache: CacheService) -> Self {
        Self { db, cache }
    }

    pub fn create(&self, create: &InstanceCreate) -> DbflowResult<Instance> {
        let instance = self.db.write_cached(&self.cache, |tx| {
            db_err!(tx.query_row(
                &format!(
                    "INSERT INTO instance (creator_id, name, engine, host, port, username)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     RETURNING {INSTANCE_COLUMNS}"
                ),
                rusqlite::params![
                    create.creator_id,
                    create.name,
                    create.engine,
                    create.host,
                    create.port,
                    create.username,
                ],
                map_instance,
            ))
        })?;
        Ok(instance)
    }

    pub fn find_list(&self, find: &InstanceFind) -> DbflowResult<Vec<Instance>> {
        self.db.read_cached(&self.cache, |tx| list_instances(tx, find))
    }

    pub fn find(&self, find: &InstanceFind) -> DbflowResult<Instance> {
        if let Some(id) = find.id.filter(|_| find.is_id_only()) {
            if let Some(instance) = self.cache.find::<Instance>(id)? {
                return Ok(instance);
            }
        }

        let list = self.db.read_cached(&self.cache, |tx| list_instances(tx, find))?;
        expect_one(list, "instance", find)
    }
}

#[derive(Clone)]
pub struct DatabaseStore {
    db: Db,
    cache: CacheService,
}

impl DatabaseStore {
    pub fn new(db: Db, cache: CacheService) -> Self {
        Self { db, cache }
    }

    pub fn create(&self, create: &DatabaseCreate) -> DbflowResult<Database> {
        let database = self.db.write_cached(&self.cache, |tx| {
            db_err!(tx.query_row(
                &format!(
                    "INSERT INTO db (creator_id, instance_id, name)
                     VALUES (?1, ?2, ?3)
                     RETURNING {DATABASE_COLUMNS}"
                ),
                rusqlite::params![create.creator_id, create.instance_id, create.name],
                map_database,
            ))
        })?;
        Ok(database)
    }

    pub fn find_list(&self, find: &DatabaseFind) -> DbflowResult<Vec<Database>> {
        self.db.read_cached(&self.cache, |tx| list_databases(tx, find))
    }

    pub fn find(&self, find: &DatabaseFind) -> DbflowResult<Database> {
        if let Some(id) = find.id.filter(|_| find.is_id_only()) {
            if let Some(database) = self.cache.find::<Database>(id)? {
                return Ok(database);
            }
        }

        let list = self.db.read_cached(&self.cache, |tx| list_databases(tx, find))?;
        expect_one(list, "database", find)
    }
}

fn map_instance(row: &Row<'_>) -> rusqlite::Result<Instance> {
    Ok(Instance {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        created_ts: row.get(2)?,
        name: row.get(3)?,
        engine: row.get(4)?,
        host: row.get(5)?,
        port: row.get(6)?,
        username: row.get(7)?,
    })
}

fn map_database(row: &Row<'_>) -> rusqlite::Result<Database> {
    Ok(Database {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        created_ts: row.get(2)?,
        instance_id: row.get(3)?,
        name: row.get(4)?,
    })
}

fn list_instances(tx: &Transaction<'_>, find: &InstanceFind) -> DbflowResult<Vec<Instance>> {
    let mut args = SqlArgs::new();
    if let Some(id) = find.id {
        args.push("id = ?", id);
    }
    if let Some(name) = &find.name {
        args.push("name = ?", name.clone());
    }

    let mut stmt = db_err!(tx.prepare(&format!(
        "SELECT {INSTANCE_COLUMNS} FROM instance WHERE {} ORDER BY id",
        args.where_clause()
    )))?;
    let rows = db_err!(stmt.query_map(args.params(), map_instance))?;
    collect_rows(rows)
}

fn list_databases(tx: &Transaction<'_>, find: &DatabaseFind) -> DbflowResult<Vec<Database>> {
    let mut args = SqlArgs::new();
    if let Some(id) = find.id {
        args.push("id = ?", id);
    }
    if let Some(instance_id) = find.instance_id {
        args.push("instance_id = ?", instance_id);
    }
    if let Some(name) = &find.name {
        args.push("name = ?", name.clone());
    }

    let mut stmt = db_err!(tx.prepare(&format!(
        "SELECT {DATABASE_COLUMNS} FROM db WHERE {} ORDER BY id",
        args.where_clause()
    )))?;
    let rows = db_err!(stmt.query_map(args.params(), map_database))?;
    collect_rows(rows)
}

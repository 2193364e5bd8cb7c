//! Backup persistence.

use rusqlite::{OptionalExtension, Row, Transaction};

use dbflow_shared::errors::{DbflowError, DbflowResult};

use super::{
    CacheService, Database, SqlArgs, collect_rows, db_err, expect_one, now_ts, parse_column,
};
use crate::api::{
    Backup, BackupCreate, BackupFind, BackupPatch, BackupStatus, BackupStorageBackend, BackupType,
};

const BACKUP_COLUMNS: &str = "id, creator_id, created_ts, updater_id, updated_ts, database_id, \
     name, status, type, storage_backend, migration_history_version, path, comment, payload";

#[derive(Clone)]
pub struct BackupStore {
    db: Database,
    cache: CacheService,
}

impl BackupStore {
    pub fn new(db: Database, cache: CacheService) -> Self {
        Self { db, cache }
    }

    /// Record a backup in `PENDING` status. Names are unique per database.
    pub fn create(&self, create: &BackupCreate) -> DbflowResult<Backup> {
        let backup = self.db.write_cached(&self.cache, |tx| insert_backup(tx, create))?;

        tracing::debug!(
            backup_id = backup.id,
            database_id = backup.database_id,
            name = %backup.name,
            "Created backup"
        );
        Ok(backup)
    }

    pub fn find_list(&self, find: &BackupFind) -> DbflowResult<Vec<Backup>> {
        self.db.read_cached(&self.cache, |tx| list_backups(tx, find))
    }

    pub fn find(&self, find: &BackupFind) -> DbflowResult<Backup> {
        if let Some(id) = find.id.filter(|_| find.is_id_only()) {
            if let Some(backup) = self.cache.find::<Backup>(id)? {
                return Ok(backup);
            }
        }

        let list = self.db.read_cached(&self.cache, |tx| list_backups(tx, find))?;
        expect_one(list, "backup", find)
    }

    pub fn patch(&self, patch: &BackupPatch) -> DbflowResult<Backup> {
        let backup = self.db.write_cached(&self.cache, |tx| update_backup(tx, patch))?;
        Ok(backup)
    }
}

fn map_backup(row: &Row<'_>) -> rusqlite::Result<Backup> {
    let status: String = row.get(7)?;
    let backup_type: String = row.get(8)?;
    let storage_backend: String = row.get(9)?;
    Ok(Backup {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        created_ts: row.get(2)?,
        updater_id: row.get(3)?,
        updated_ts: row.get(4)?,
        database_id: row.get(5)?,
        name: row.get(6)?,
        status: parse_column(7, &status, BackupStatus::parse)?,
        backup_type: parse_column(8, &backup_type, BackupType::parse)?,
        storage_backend: parse_column(9, &storage_backend, BackupStorageBackend::parse)?,
        migration_history_version: row.get(10)?,
        path: row.get(11)?,
        comment: row.get(12)?,
        payload: row.get(13)?,
    })
}

fn insert_backup(tx: &Transaction<'_>, create: &BackupCreate) -> DbflowResult<Backup> {
    db_err!(tx.query_row(
        &format!(
            "INSERT INTO backup (creator_id, updater_id, database_id, name, status, type,
                                 storage_backend, migration_history_version, path)
             VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             RETURNING {BACKUP_COLUMNS}"
        ),
        rusqlite::params![
            create.creator_id,
            create.database_id,
            create.name,
            BackupStatus::Pending.as_str(),
            create.backup_type.as_str(),
            create.storage_backend.as_str(),
            create.migration_history_version,
            create.path,
        ],
        map_backup,
    ))
}

fn list_backups(tx: &Transaction<'_>, find: &BackupFind) -> DbflowResult<Vec<Backup>> {
    let mut args = SqlArgs::new();
    if let Some(id) = find.id {
        args.push("id = ?", id);
    }
    if let Some(database_id) = find.database_id {
        args.push("database_id = ?", database_id);
    }
    if let Some(name) = &find.name {
        args.push("name = ?", name.clone());
    }
    if let Some(status) = find.status {
        args.push("status = ?", status.as_str().to_string());
    }

    let mut stmt = db_err!(tx.prepare(&format!(
        "SELECT {BACKUP_COLUMNS} FROM backup WHERE {} ORDER BY id DESC",
        args.where_clause()
    )))?;
    let rows = db_err!(stmt.query_map(args.params(), map_backup))?;
    collect_rows(rows)
}

fn update_backup(tx: &Transaction<'_>, patch: &BackupPatch) -> DbflowResult<Backup> {
    let mut set = SqlArgs::new();
    set.push("updater_id = ?", patch.updater_id);
    set.push("updated_ts = ?", now_ts());
    if let Some(status) = patch.status {
        set.push("status = ?", status.as_str().to_string());
    }
    if let Some(comment) = &patch.comment {
        set.push("comment = ?", comment.clone());
    }
    if let Some(payload) = &patch.payload {
        set.push("payload = ?", payload.clone());
    }
    set.bind(patch.id);

    db_err!(
        tx.query_row(
            &format!(
                "UPDATE backup SET {} WHERE id = ? RETURNING {BACKUP_COLUMNS}",
                set.set_clause()
            ),
            set.params(),
            map_backup,
        )
        .optional()
    )?
    .ok_or_else(|| DbflowError::NotFound(format!("backup ID not found: {}", patch.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{DatabaseCreate, InstanceCreate};
    use crate::db::{DatabaseStore, InstanceStore};

    fn setup() -> (BackupStore, i64) {
        let db = Database::open_in_memory().unwrap();
        let cache = CacheService::new();
        let instance = InstanceStore::new(db.clone(), cache.clone())
            .create(&InstanceCreate {
                creator_id: 1,
                name: "pg".into(),
                engine: "POSTGRES".into(),
                host: "localhost".into(),
                port: "5432".into(),
                username: "postgres".into(),
            })
            .unwrap();
        let database = DatabaseStore::new(db.clone(), cache.clone())
            .create(&DatabaseCreate {
                creator_id: 1,
                instance_id: instance.id,
                name: "billing".into(),
            })
            .unwrap();
        (BackupStore::new(db, cache), database.id)
    }

    fn backup_create(database_id: i64, name: &str) -> BackupCreate {
        BackupCreate {
            creator_id: 1,
            database_id,
            name: name.to_string(),
            backup_type: BackupType::Manual,
            storage_backend: BackupStorageBackend::Local,
            migration_history_version: "0001".into(),
            path: format!("backup/db/{database_id}/{name}.sql"),
        }
    }

    #[test]
    fn test_create_pending_backup() {
        let (store, database_id) = setup();
        let backup = store.create(&backup_create(database_id, "nightly")).unwrap();
        assert_eq!(backup.status, BackupStatus::Pending);
        assert_eq!(backup.path, format!("backup/db/{database_id}/nightly.sql"));
        assert_eq!(store.find(&BackupFind::by_id(backup.id)).unwrap(), backup);
    }

    #[test]
    fn test_name_unique_per_database() {
        let (store, database_id) = setup();
        store.create(&backup_create(database_id, "nightly")).unwrap();
        assert!(matches!(
            store.create(&backup_create(database_id, "nightly")),
            Err(DbflowError::Conflict(_))
        ));
    }

    #[test]
    fn test_patch_status_and_comment() {
        let (store, database_id) = setup();
        let backup = store.create(&backup_create(database_id, "b1")).unwrap();
        let failed = store
            .patch(&BackupPatch {
                id: backup.id,
                updater_id: 1,
                status: Some(BackupStatus::Failed),
                comment: Some("dump failed".into()),
                payload: None,
            })
            .unwrap();
        assert_eq!(failed.status, BackupStatus::Failed);
        assert_eq!(failed.comment, "dump failed");

        let by_name = store
            .find(&BackupFind {
                database_id: Some(database_id),
                name: Some("b1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_name, failed);
    }
}

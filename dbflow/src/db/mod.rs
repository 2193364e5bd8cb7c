//! Database layer for dbflow.
//!
//! Provides SQLite-based persistence for the pipeline containment tree
//! (pipeline → stage → task → task run) plus backups and lookup-only
//! instance/database references.
//!
//! Every entity store follows the same shape:
//! - `create`/`patch` run one transaction with a `RETURNING` clause, commit,
//!   then upsert the returned entity into the [`CacheService`] while still
//!   holding the connection, so cache order matches commit order
//! - `find` checks the cache for exact-id lookups, otherwise queries and
//!   requires exactly one row (`NotFound` / `Conflict`)
//! - `find_list` always queries and refreshes the cache per row

mod backup;
mod cache;
mod instance;
mod pipeline;
mod schema;
mod stage;
mod task;
mod task_run;

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode as SqliteErrorCode, OptionalExtension, Transaction};

use dbflow_shared::errors::{DbflowError, DbflowResult};

pub use backup::BackupStore;
pub use cache::{CacheKind, CacheService, Cacheable};
pub use instance::{DatabaseStore, InstanceStore};
pub use pipeline::PipelineStore;
pub use stage::StageStore;
pub use task::TaskStore;
pub use task_run::TaskRunStore;

/// Helper macro to convert rusqlite errors to DbflowError.
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err($crate::db::format_error)
    };
}

pub(crate) use db_err;

/// Map a rusqlite error onto the dbflow taxonomy.
///
/// Constraint violations mean a uniqueness assumption broke and surface as
/// `Conflict`. Unknown enum tags in a row surface as `Unsupported`.
pub(crate) fn format_error(err: rusqlite::Error) -> DbflowError {
    match &err {
        rusqlite::Error::SqliteFailure(e, msg) if e.code == SqliteErrorCode::ConstraintViolation => {
            DbflowError::Conflict(msg.clone().unwrap_or_else(|| err.to_string()))
        }
        rusqlite::Error::FromSqlConversionFailure(_, _, e) => DbflowError::Unsupported(e.to_string()),
        _ => DbflowError::Database(err.to_string()),
    }
}

/// All entity stores over one database, sharing one cache.
#[derive(Clone)]
pub struct Stores {
    pub pipelines: PipelineStore,
    pub stages: StageStore,
    pub tasks: TaskStore,
    pub task_runs: TaskRunStore,
    pub backups: BackupStore,
    pub instances: InstanceStore,
    pub databases: DatabaseStore,
    pub cache: CacheService,
}

impl Stores {
    pub fn new(db: Database) -> Self {
        let cache = CacheService::new();
        Self {
            pipelines: PipelineStore::new(db.clone(), cache.clone()),
            stages: StageStore::new(db.clone(), cache.clone()),
            tasks: TaskStore::new(db.clone(), cache.clone()),
            task_runs: TaskRunStore::new(db.clone(), cache.clone()),
            backups: BackupStore::new(db.clone(), cache.clone()),
            instances: InstanceStore::new(db.clone(), cache.clone()),
            databases: DatabaseStore::new(db, cache.clone()),
            cache,
        }
    }
}

/// SQLite database handle.
///
/// Thread-safe via `parking_lot::Mutex`. Domain-specific stores
/// wrap this to provide their APIs (e.g., `TaskStore`).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database.
    pub fn open(db_path: &Path) -> DbflowResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = db_err!(Connection::open(db_path))?;

        // - WAL mode: readers don't block the scheduler's writes
        // - FULL sync: fsync after each transaction
        // - Foreign keys: containment tree integrity
        // - Busy timeout: tolerate other processes sharing the file
        db_err!(conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=100000;
            "
        ))?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> DbflowResult<Self> {
        let conn = db_err!(Connection::open_in_memory())?;
        db_err!(conn.execute_batch("PRAGMA foreign_keys=ON;"))?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the database connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Run `f` inside a transaction, commit, then run `publish` on the
    /// result before the connection is released.
    ///
    /// Any error (including a failed commit) drops the transaction, which
    /// rolls it back, and skips `publish`.
    fn transact<T, F, P>(&self, f: F, publish: P) -> DbflowResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> DbflowResult<T>,
        P: FnOnce(&T) -> DbflowResult<()>,
    {
        let mut conn = self.conn();
        let tx = db_err!(conn.transaction())?;
        let value = f(&tx)?;
        db_err!(tx.commit())?;
        publish(&value)?;
        Ok(value)
    }

    /// Write through a transaction and upsert the returned entity.
    ///
    /// The cache is updated under the connection lock, so cache writes land
    /// in the same order as the commits they mirror.
    pub(crate) fn write_cached<T, F>(&self, cache: &CacheService, f: F) -> DbflowResult<T>
    where
        T: Cacheable,
        F: FnOnce(&Transaction<'_>) -> DbflowResult<T>,
    {
        self.transact(f, |value| cache.upsert(value))
    }

    /// Read a list and refresh the cache per row, under the connection lock.
    pub(crate) fn read_cached<T, F>(&self, cache: &CacheService, f: F) -> DbflowResult<Vec<T>>
    where
        T: Cacheable,
        F: FnOnce(&Transaction<'_>) -> DbflowResult<Vec<T>>,
    {
        self.transact(f, |list| list.iter().try_for_each(|value| cache.upsert(value)))
    }

    fn init_schema(conn: &Connection) -> DbflowResult<()> {
        for sql in schema::all_schemas() {
            db_err!(conn.execute_batch(sql))?;
        }

        let current_version: Option<i32> = db_err!(
            conn.query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
        )?;

        match current_version {
            None => {
                let now = Utc::now().to_rfc3339();
                db_err!(conn.execute(
                    "INSERT INTO schema_version (id, version, updated_at) VALUES (1, ?1, ?2)",
                    rusqlite::params![schema::SCHEMA_VERSION, now],
                ))?;
                tracing::info!(
                    "Initialized database schema version {}",
                    schema::SCHEMA_VERSION
                );
            }
            Some(v) if v < schema::SCHEMA_VERSION => {
                tracing::warn!(
                    "Database schema version {} is older than current {}. Migrations not yet implemented.",
                    v,
                    schema::SCHEMA_VERSION
                );
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(DbflowError::Database(format!(
                    "Database schema version {} is newer than supported {}. Please upgrade dbflow.",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(_) => {}
        }

        Ok(())
    }
}

/// Dynamically assembled SQL fragments with positional parameters.
///
/// Used both for `WHERE` clauses (joined with `AND`) and `SET` lists
/// (joined with `, `).
#[derive(Debug, Default)]
pub(crate) struct SqlArgs {
    fragments: Vec<String>,
    params: Vec<Value>,
}

impl SqlArgs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append `fragment` (containing exactly one `?`) bound to `value`.
    pub(crate) fn push(&mut self, fragment: &str, value: impl Into<Value>) {
        self.fragments.push(fragment.to_string());
        self.params.push(value.into());
    }

    /// Append `column IN (?, ?, ...)`. An empty set matches nothing.
    pub(crate) fn push_in(&mut self, column: &str, values: impl IntoIterator<Item = Value>) {
        let values: Vec<Value> = values.into_iter().collect();
        if values.is_empty() {
            self.fragments.push("0 = 1".to_string());
            return;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.fragments.push(format!("{column} IN ({placeholders})"));
        self.params.extend(values);
    }

    /// Append a parameter that is not tied to a fragment (e.g. the id of an
    /// `UPDATE ... WHERE id = ?`).
    pub(crate) fn bind(&mut self, value: impl Into<Value>) {
        self.params.push(value.into());
    }

    pub(crate) fn where_clause(&self) -> String {
        if self.fragments.is_empty() {
            "1 = 1".to_string()
        } else {
            self.fragments.join(" AND ")
        }
    }

    pub(crate) fn set_clause(&self) -> String {
        self.fragments.join(", ")
    }

    pub(crate) fn params(&self) -> rusqlite::ParamsFromIter<std::slice::Iter<'_, Value>> {
        rusqlite::params_from_iter(self.params.iter())
    }
}

/// Reduce a result set to its single row.
///
/// Zero rows is `NotFound`; more than one is `Conflict`, since callers only
/// use this for lookups expected to be unique.
pub(crate) fn expect_one<T>(mut list: Vec<T>, entity: &str, find: &dyn Debug) -> DbflowResult<T> {
    match list.len() {
        0 => Err(DbflowError::NotFound(format!("{entity} not found: {find:?}"))),
        1 => Ok(list.remove(0)),
        n => Err(DbflowError::Conflict(format!(
            "found {n} {entity}s with filter {find:?}, expect 1"
        ))),
    }
}

/// Current unix timestamp in seconds.
pub(crate) fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// Collect mapped rows, converting errors.
pub(crate) fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> DbflowResult<Vec<T>> {
    let mut list = Vec::new();
    for row in rows {
        list.push(db_err!(row)?);
    }
    Ok(list)
}

/// Parse a status/type column, reporting unknown tags as `Unsupported`.
pub(crate) fn parse_column<T>(
    idx: usize,
    raw: &str,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unsupported value {raw:?}").into(),
        )
    })
}

//! High-level runtime structures.

use std::sync::Arc;

use tokio::sync::watch;

use dbflow_shared::errors::{DbflowError, DbflowResult};

use crate::api::{Backup, BackupCreate, BackupStorageBackend, BackupType, DatabaseFind};
use crate::db::{Database, Stores};
use crate::executor::{
    DiskProbe, ExecutorEnv, ExecutorRegistry, StatvfsProbe, backup_relative_path,
    validate_backup_name,
};
use crate::init_logging_for;
use crate::plugin::{Advisor, DriverFactory, ObjectStorage};
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::options::DbflowOptions;
use crate::scheduler::Scheduler;

/// External capabilities injected by the embedding application.
#[derive(Clone)]
pub struct Capabilities {
    pub drivers: Arc<dyn DriverFactory>,
    pub storage: Option<Arc<dyn ObjectStorage>>,
    pub advisors: Vec<Arc<dyn Advisor>>,
    pub disk: Arc<dyn DiskProbe>,
}

impl Capabilities {
    pub fn new(drivers: Arc<dyn DriverFactory>) -> Self {
        Self {
            drivers,
            storage: None,
            advisors: Vec::new(),
            disk: Arc::new(StatvfsProbe),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.advisors.push(advisor);
        self
    }

    pub fn with_disk_probe(mut self, disk: Arc<dyn DiskProbe>) -> Self {
        self.disk = disk;
        self
    }
}

/// DbflowRuntime is the entry point for embedding the task pipeline.
///
/// **Cloning**: cheaply cloneable via `Arc`; all clones share the same
/// stores and scheduler.
#[derive(Clone)]
pub struct DbflowRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    options: DbflowOptions,
    layout: FilesystemLayout,
    stores: Stores,
    scheduler: Scheduler,
}

impl DbflowRuntime {
    /// Create a runtime with the provided options.
    ///
    /// All setup (filesystem, logging, database) completes before returning.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The options are invalid
    /// - The data dir cannot be prepared
    /// - The database cannot be opened
    pub fn new(options: DbflowOptions, capabilities: Capabilities) -> DbflowResult<Self> {
        let options = options.sanitize()?;

        let layout = FilesystemLayout::new(options.data_dir.clone());
        layout.prepare().map_err(|e| {
            DbflowError::Storage(format!(
                "Failed to initialize filesystem at {}: {}",
                layout.data_dir().display(),
                e
            ))
        })?;

        init_logging_for(&layout)?;

        let db = Database::open(&layout.db_path()).map_err(|e| {
            DbflowError::Storage(format!(
                "Failed to initialize database at {}: {}",
                layout.db_path().display(),
                e
            ))
        })?;
        let stores = Stores::new(db);

        let executors = ExecutorRegistry::new(ExecutorEnv {
            instances: stores.instances.clone(),
            databases: stores.databases.clone(),
            backups: stores.backups.clone(),
            drivers: capabilities.drivers,
            storage: capabilities.storage,
            advisors: capabilities.advisors,
            disk: capabilities.disk,
            data_dir: layout.data_dir().to_path_buf(),
            min_backup_free_bytes: options.min_backup_free_bytes,
        });
        let scheduler = Scheduler::new(stores.clone(), executors, options.scheduler_config());

        tracing::debug!(data_dir = %layout.data_dir().display(), "initialized runtime");

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                options,
                layout,
                stores,
                scheduler,
            }),
        })
    }

    pub fn options(&self) -> &DbflowOptions {
        &self.inner.options
    }

    pub fn layout(&self) -> &FilesystemLayout {
        &self.inner.layout
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Register a backup of `database_id` at its standard path.
    ///
    /// The backup starts `PENDING`; a `backup` task referencing it does the
    /// work. The name becomes a file name, so separators and `..` are
    /// rejected with `InvalidArgument`.
    pub fn create_backup(
        &self,
        creator_id: i64,
        database_id: i64,
        name: &str,
        backup_type: BackupType,
        storage_backend: BackupStorageBackend,
        migration_history_version: &str,
    ) -> DbflowResult<Backup> {
        validate_backup_name(name)?;
        let database = self
            .inner
            .stores
            .databases
            .find(&DatabaseFind::by_id(database_id))?;
        self.inner.stores.backups.create(&BackupCreate {
            creator_id,
            database_id: database.id,
            name: name.to_string(),
            backup_type,
            storage_backend,
            migration_history_version: migration_history_version.to_string(),
            path: backup_relative_path(database.id, name),
        })
    }

    /// Run the scheduler until `shutdown` flips to `true`.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> DbflowResult<()> {
        self.inner.scheduler.run(shutdown).await
    }
}

//! Shared fixtures: in-process fakes for the capability traits and a
//! runtime rooted in a temp dir.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use dbflow::api::{
    Database, DatabaseCreate, Instance, InstanceCreate, Pipeline, PipelineCreate, Stage,
    StageCreate, Task, TaskCreate, TaskFind, TaskRun, TaskRunFind, TaskStatus, TaskType,
};
use dbflow::executor::DiskProbe;
use dbflow::plugin::{
    Advice, AdviceStatus, Advisor, DatabaseSchemaMetadata, Driver, DriverFactory,
    InstanceMetadata, ObjectStorage, SchemaMetadata,
};
use dbflow::{Capabilities, DbflowError, DbflowOptions, DbflowResult, DbflowRuntime};

pub const MIB: u64 = 1024 * 1024;
pub const DUMP_CONTENT: &str = "CREATE TABLE orders (id INT);\n";
pub const DUMP_METADATA: &str = r#"{"format":"sql"}"#;

// ============================================================================
// FAKE DRIVER
// ============================================================================

/// Observable state shared by every driver the fake factory hands out.
#[derive(Default)]
pub struct DriverState {
    pub executed: Mutex<Vec<String>>,
    pub dumps: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub fail_execute: AtomicBool,
    pub block_execute: AtomicBool,
    pub fail_dump: AtomicBool,
    /// Write part of the dump, then never finish.
    pub block_dump: AtomicBool,
}

impl DriverState {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

pub struct FakeDriverFactory {
    pub state: Arc<DriverState>,
}

#[async_trait::async_trait]
impl DriverFactory for FakeDriverFactory {
    async fn admin_driver(
        &self,
        _instance: &Instance,
        database_name: Option<&str>,
    ) -> DbflowResult<Box<dyn Driver>> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDriver {
            state: self.state.clone(),
            database: database_name.map(str::to_string),
        }))
    }
}

struct FakeDriver {
    state: Arc<DriverState>,
    database: Option<String>,
}

#[async_trait::async_trait]
impl Driver for FakeDriver {
    async fn sync_instance(&self) -> DbflowResult<InstanceMetadata> {
        Ok(InstanceMetadata {
            version: "8.0.36".into(),
            roles: vec!["admin".into()],
            databases: vec![
                DatabaseSchemaMetadata {
                    name: "orders".into(),
                    schemas: Vec::new(),
                },
                DatabaseSchemaMetadata {
                    name: "billing".into(),
                    schemas: Vec::new(),
                },
            ],
        })
    }

    async fn sync_db_schema(&self) -> DbflowResult<DatabaseSchemaMetadata> {
        Ok(DatabaseSchemaMetadata {
            name: self.database.clone().unwrap_or_default(),
            schemas: vec![SchemaMetadata {
                name: "public".into(),
                tables: vec!["orders".into(), "items".into()],
                views: Vec::new(),
            }],
        })
    }

    async fn dump(
        &self,
        _database: &str,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        _schema_only: bool,
    ) -> DbflowResult<String> {
        self.state.dumps.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_dump.load(Ordering::SeqCst) {
            out.write_all(b"CREATE TABLE partial").await?;
            return Err(DbflowError::Driver("connection reset during dump".into()));
        }
        if self.state.block_dump.load(Ordering::SeqCst) {
            out.write_all(b"CREATE TABLE partial").await?;
            out.flush().await?;
            return std::future::pending().await;
        }
        out.write_all(DUMP_CONTENT.as_bytes()).await?;
        Ok(DUMP_METADATA.to_string())
    }

    async fn execute(&self, statement: &str) -> DbflowResult<i64> {
        if self.state.block_execute.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        if self.state.fail_execute.load(Ordering::SeqCst) {
            return Err(DbflowError::Driver("table orders already exists".into()));
        }
        self.state.executed.lock().push(statement.to_string());
        Ok(1)
    }

    async fn close(&self) -> DbflowResult<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// FAKE STORAGE / DISK / ADVISOR
// ============================================================================

#[derive(Default)]
pub struct FakeStorage {
    pub objects: Mutex<Vec<(String, Vec<u8>)>>,
    pub fail: AtomicBool,
}

#[async_trait::async_trait]
impl ObjectStorage for FakeStorage {
    fn bucket(&self) -> &str {
        "dbflow-backups"
    }

    async fn upload_object(
        &self,
        key: &str,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> DbflowResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DbflowError::Storage("403 access denied".into()));
        }
        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes).await?;
        self.objects.lock().push((key.to_string(), bytes));
        Ok(())
    }
}

pub struct FixedDisk {
    pub available: AtomicU64,
}

impl DiskProbe for FixedDisk {
    fn available_bytes(&self, _path: &Path) -> DbflowResult<u64> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}

/// Rejects any statement containing `DROP`.
pub struct NoDropAdvisor;

impl Advisor for NoDropAdvisor {
    fn name(&self) -> &str {
        "no-drop"
    }

    fn check(&self, statement: &str) -> DbflowResult<Vec<Advice>> {
        if statement.to_uppercase().contains("DROP") {
            return Ok(vec![Advice {
                status: AdviceStatus::Error,
                code: 101,
                title: "statement.disallow-drop".into(),
                content: "DROP is not allowed".into(),
            }]);
        }
        Ok(vec![Advice::ok()])
    }
}

// ============================================================================
// HARNESS
// ============================================================================

pub struct HarnessConfig {
    pub max_concurrent_tasks: usize,
    pub task_timeout_secs: u64,
    pub available_disk: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 8,
            task_timeout_secs: 60,
            available_disk: 10 * 1024 * MIB,
        }
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub runtime: DbflowRuntime,
    pub driver: Arc<DriverState>,
    pub storage: Arc<FakeStorage>,
    pub disk: Arc<FixedDisk>,
    pub instance: Instance,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(HarnessConfig::default())
    }

    pub fn with_config(config: HarnessConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let mut options = DbflowOptions::with_data_dir(dir.path().join("data"));
        options.poll_interval_ms = 10;
        options.max_concurrent_tasks = config.max_concurrent_tasks;
        options.task_timeout_secs = config.task_timeout_secs;

        let driver = Arc::new(DriverState::default());
        let storage = Arc::new(FakeStorage::default());
        let disk = Arc::new(FixedDisk {
            available: AtomicU64::new(config.available_disk),
        });
        let capabilities = Capabilities::new(Arc::new(FakeDriverFactory {
            state: driver.clone(),
        }))
        .with_storage(storage.clone())
        .with_advisor(Arc::new(NoDropAdvisor))
        .with_disk_probe(disk.clone());

        let runtime = DbflowRuntime::new(options, capabilities).unwrap();
        let instance = runtime
            .stores()
            .instances
            .create(&InstanceCreate {
                creator_id: 101,
                name: "mysql-prod".into(),
                engine: "MYSQL".into(),
                host: "10.0.0.5".into(),
                port: "3306".into(),
                username: "admin".into(),
            })
            .unwrap();

        Self {
            dir,
            runtime,
            driver,
            storage,
            disk,
            instance,
        }
    }

    pub fn database(&self, name: &str) -> Database {
        self.runtime
            .stores()
            .databases
            .create(&DatabaseCreate {
                creator_id: 101,
                instance_id: self.instance.id,
                name: name.into(),
            })
            .unwrap()
    }

    pub fn pipeline(&self, name: &str) -> Pipeline {
        self.runtime
            .stores()
            .pipelines
            .create(&PipelineCreate {
                creator_id: 101,
                name: name.into(),
            })
            .unwrap()
    }

    pub fn stage(&self, pipeline: &Pipeline, name: &str) -> Stage {
        self.runtime
            .stores()
            .stages
            .create(&StageCreate {
                creator_id: 101,
                pipeline_id: pipeline.id,
                name: name.into(),
            })
            .unwrap()
    }

    pub fn task(
        &self,
        stage: &Stage,
        database: Option<&Database>,
        task_type: TaskType,
        status: TaskStatus,
        payload: &str,
    ) -> Task {
        self.runtime
            .stores()
            .tasks
            .create(&TaskCreate {
                creator_id: 101,
                pipeline_id: stage.pipeline_id,
                stage_id: stage.id,
                instance_id: self.instance.id,
                database_id: database.map(|d| d.id),
                name: format!("{task_type} task"),
                status,
                task_type,
                payload: payload.into(),
            })
            .unwrap()
    }

    pub fn general_task(&self, stage: &Stage, database: &Database) -> Task {
        self.task(stage, Some(database), TaskType::General, TaskStatus::Pending, "{}")
    }

    pub fn migration_task(&self, stage: &Stage, database: &Database, statement: &str) -> Task {
        let payload = serde_json::json!({ "statement": statement, "schemaVersion": "0002" });
        self.task(
            stage,
            Some(database),
            TaskType::Migration,
            TaskStatus::Pending,
            &payload.to_string(),
        )
    }

    pub fn status(&self, task: &Task) -> TaskStatus {
        self.runtime
            .stores()
            .tasks
            .find(&TaskFind::by_id(task.id))
            .unwrap()
            .status
    }

    pub fn runs(&self, task: &Task) -> Vec<TaskRun> {
        self.runtime
            .stores()
            .task_runs
            .find_list(&TaskRunFind::by_task(task.id))
            .unwrap()
    }

    /// Tick, then wait for every worker the tick spawned.
    pub async fn step(&self) -> usize {
        let dispatched = self.runtime.scheduler().tick().await.unwrap();
        self.runtime.scheduler().drain().await;
        dispatched
    }
}

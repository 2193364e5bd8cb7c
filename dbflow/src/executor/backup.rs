//! Database backup executor.
//!
//! Dumps a database to `<data_dir>/backup/db/<database_id>/<name>.sql` and,
//! for remote backends, ships the file to object storage. Past the free space
//! check, the backup row is patched exactly once with the outcome.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use dbflow_shared::errors::{DbflowError, DbflowResult, ResultExt};

use super::{ExecutorEnv, RunContext, RunOnceOutcome, TaskExecutor};
use crate::api::{
    Backup, BackupFind, BackupPatch, BackupStatus, BackupStorageBackend, Database, Instance,
    SYSTEM_BOT_ID, Task, TaskDatabaseBackupPayload, TaskRunResult,
};
use crate::plugin::Driver;

const MIB: u64 = 1024 * 1024;

/// Path of a backup file relative to the data dir. Also the object key for
/// remote backends.
pub fn backup_relative_path(database_id: i64, name: &str) -> String {
    format!("backup/db/{database_id}/{name}.sql")
}

/// Reject names that would escape the database's backup directory.
pub fn validate_backup_name(name: &str) -> DbflowResult<()> {
    if name.trim().is_empty() {
        return Err(DbflowError::InvalidArgument("backup name is empty".to_string()));
    }
    if name.contains(['/', '\\', '\0']) || name.contains("..") {
        return Err(DbflowError::InvalidArgument(format!(
            "backup name {name:?} must not contain path separators or \"..\""
        )));
    }
    Ok(())
}

pub struct BackupExecutor {
    env: ExecutorEnv,
}

impl BackupExecutor {
    pub fn new(env: ExecutorEnv) -> Self {
        Self { env }
    }

    /// Refuse to start a local dump on a nearly full filesystem.
    fn check_free_space(&self, dir: &Path) -> DbflowResult<()> {
        let available = self.env.disk.available_bytes(dir).with_context(|| {
            format!(
                "failed to get available file system space, backup file dir is {}",
                dir.display()
            )
        })?;
        let threshold = self.env.min_backup_free_bytes;
        if available < threshold {
            return Err(DbflowError::ResourceExhausted(format!(
                "the available file system space {}MB is less than the minimal threshold {}MB",
                available / MIB,
                threshold / MIB
            )));
        }
        Ok(())
    }

    async fn backup_database(
        &self,
        ctx: &RunContext,
        instance: &Instance,
        database: &Database,
        backup: &Backup,
        local_path: &Path,
    ) -> DbflowResult<String> {
        if !matches!(
            backup.storage_backend,
            BackupStorageBackend::Local | BackupStorageBackend::S3
        ) {
            return Err(DbflowError::Unsupported(format!(
                "backup to {} not implemented yet",
                backup.storage_backend
            )));
        }

        let payload = self
            .env
            .with_driver(instance, Some(database.name.as_str()), |driver| async move {
                dump_to_file(ctx, driver.as_ref(), &database.name, local_path).await
            })
            .await;
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                remove_local_file(local_path).await;
                return Err(e.context(format!(
                    "failed to dump backup file {}",
                    local_path.display()
                )));
            }
        };

        match backup.storage_backend {
            BackupStorageBackend::Local => Ok(payload),
            BackupStorageBackend::S3 => {
                self.upload(ctx, backup, local_path).await?;
                remove_local_file(local_path).await;
                Ok(payload)
            }
            other => Err(DbflowError::Unsupported(format!(
                "backup to {other} not implemented yet"
            ))),
        }
    }

    /// Upload the dump. On failure the local file is kept for inspection.
    async fn upload(&self, ctx: &RunContext, backup: &Backup, local_path: &Path) -> DbflowResult<()> {
        let storage = self.env.storage.as_ref().ok_or_else(|| {
            DbflowError::Config("no object storage configured for S3 backups".to_string())
        })?;

        tracing::debug!(
            bucket = storage.bucket(),
            path = %local_path.display(),
            "Uploading backup to bucket"
        );
        let mut file = tokio::fs::File::open(local_path).await.map_err(|e| {
            DbflowError::Storage(format!(
                "failed to open backup file {} for uploading: {}",
                local_path.display(),
                e
            ))
        })?;

        match ctx.guard(storage.upload_object(&backup.path, &mut file)).await {
            Ok(()) => {
                tracing::debug!(bucket = storage.bucket(), key = %backup.path, "Uploaded backup");
                Ok(())
            }
            Err(e @ (DbflowError::Cancelled(_) | DbflowError::Timeout(_))) => Err(e),
            Err(e) => Err(DbflowError::TransientIo(format!(
                "failed to upload backup to bucket {}: {}",
                storage.bucket(),
                e
            ))),
        }
    }
}

async fn dump_to_file(
    ctx: &RunContext,
    driver: &dyn Driver,
    database_name: &str,
    local_path: &Path,
) -> DbflowResult<String> {
    let mut file = tokio::fs::File::create(local_path).await.map_err(|e| {
        DbflowError::Storage(format!(
            "failed to open backup path {}: {}",
            local_path.display(),
            e
        ))
    })?;
    let payload = ctx
        .guard(driver.dump(database_name, &mut file, false))
        .await
        .with_context(|| format!("failed to dump database {database_name:?}"))?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(payload)
}

async fn remove_local_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed local backup file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove local backup file")
        }
    }
}

#[async_trait]
impl TaskExecutor for BackupExecutor {
    async fn run_once(&self, ctx: &RunContext, task: &Task) -> DbflowResult<RunOnceOutcome> {
        let payload: TaskDatabaseBackupPayload = serde_json::from_str(&task.payload).map_err(|e| {
            DbflowError::InvalidArgument(format!("invalid database backup payload: {e}"))
        })?;
        let backup = self
            .env
            .backups
            .find(&BackupFind::by_id(payload.backup_id))
            .with_context(|| format!("failed to find backup with ID {}", payload.backup_id))?;

        let (instance, database) = self.env.resolve_target(task)?;
        let database = database.ok_or_else(|| {
            DbflowError::InvalidArgument(format!("backup task {} has no database", task.id))
        })?;

        let local_path = self.env.data_dir.join(&backup.path);
        let backup_dir = local_path.parent().unwrap_or(&self.env.data_dir).to_path_buf();
        tokio::fs::create_dir_all(&backup_dir).await.map_err(|e| {
            DbflowError::Storage(format!(
                "failed to create backup directory {}: {}",
                backup_dir.display(),
                e
            ))
        })?;
        if backup.storage_backend == BackupStorageBackend::Local {
            self.check_free_space(&backup_dir)?;
        }
        ctx.check()?;

        tracing::debug!(
            instance = %instance.name,
            database = %database.name,
            backup = %backup.name,
            "Start database backup"
        );
        let outcome = self
            .backup_database(ctx, &instance, &database, &backup, &local_path)
            .await;

        let (status, comment, dump_payload) = match &outcome {
            Ok(dump_payload) => (BackupStatus::Done, String::new(), dump_payload.clone()),
            Err(e) => (BackupStatus::Failed, e.to_string(), String::new()),
        };
        self.env
            .backups
            .patch(&BackupPatch {
                id: backup.id,
                updater_id: SYSTEM_BOT_ID,
                status: Some(status),
                comment: Some(comment),
                payload: Some(dump_payload),
            })
            .context("failed to patch backup")?;

        outcome?;
        Ok((
            true,
            Some(TaskRunResult::detail(format!(
                "Backup database {:?}",
                database.name
            ))),
        ))
    }
}

use serde::{Deserialize, Serialize};

use super::string_enum;

string_enum! {
    pub enum BackupStatus {
        Pending => "PENDING",
        Done => "DONE",
        Failed => "FAILED",
    }
}

string_enum! {
    /// Where the dump artifact ends up.
    pub enum BackupStorageBackend {
        Local => "LOCAL",
        S3 => "S3",
        Gcs => "GCS",
    }
}

string_enum! {
    pub enum BackupType {
        Manual => "MANUAL",
        Automatic => "AUTOMATIC",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub id: i64,
    pub creator_id: i64,
    pub created_ts: i64,
    pub updater_id: i64,
    pub updated_ts: i64,
    pub database_id: i64,
    pub name: String,
    pub status: BackupStatus,
    pub backup_type: BackupType,
    pub storage_backend: BackupStorageBackend,
    pub migration_history_version: String,
    /// Relative to the data dir for local backups; the object key for remote ones.
    pub path: String,
    pub comment: String,
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct BackupCreate {
    pub creator_id: i64,
    pub database_id: i64,
    pub name: String,
    pub backup_type: BackupType,
    pub storage_backend: BackupStorageBackend,
    pub migration_history_version: String,
    pub path: String,
}

#[derive(Debug, Clone, Default)]
pub struct BackupFind {
    pub id: Option<i64>,
    pub database_id: Option<i64>,
    pub name: Option<String>,
    pub status: Option<BackupStatus>,
}

impl BackupFind {
    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub(crate) fn is_id_only(&self) -> bool {
        self.id.is_some()
            && self.database_id.is_none()
            && self.name.is_none()
            && self.status.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct BackupPatch {
    pub id: i64,
    pub updater_id: i64,
    pub status: Option<BackupStatus>,
    pub comment: Option<String>,
    pub payload: Option<String>,
}

use serde::{Deserialize, Serialize};

use super::string_enum;

string_enum! {
    /// Task lifecycle.
    ///
    /// ```text
    /// PENDING_APPROVAL → PENDING → RUNNING → DONE
    ///                                     ↘ FAILED → RUNNING (operator retry)
    /// any non-terminal state → CANCELED (operator)
    /// ```
    pub enum TaskStatus {
        PendingApproval => "PENDING_APPROVAL",
        Pending => "PENDING",
        Running => "RUNNING",
        Done => "DONE",
        Failed => "FAILED",
        Canceled => "CANCELED",
    }
}

impl TaskStatus {
    /// `Failed` is not terminal: an operator may retry it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Canceled)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (PendingApproval, Pending)
                | (Pending, Running)
                | (Running, Done)
                | (Running, Failed)
                | (Failed, Running)
                | (PendingApproval, Canceled)
                | (Pending, Canceled)
                | (Running, Canceled)
                | (Failed, Canceled)
        )
    }
}

string_enum! {
    /// Task type tag. Selects the executor.
    pub enum TaskType {
        General => "general",
        Migration => "migration",
        Backup => "backup",
        Sync => "sync",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub creator_id: i64,
    pub created_ts: i64,
    pub updater_id: i64,
    pub updated_ts: i64,
    pub pipeline_id: i64,
    pub stage_id: i64,
    pub instance_id: i64,
    pub database_id: Option<i64>,
    pub name: String,
    pub status: TaskStatus,
    pub task_type: TaskType,
    /// JSON document interpreted only by the task's executor.
    pub payload: String,
}

impl Task {
    /// Key of the per-database mutex enforced through persisted state.
    pub fn target(&self) -> (i64, Option<i64>) {
        (self.instance_id, self.database_id)
    }
}

#[derive(Debug, Clone)]
pub struct TaskCreate {
    pub creator_id: i64,
    pub pipeline_id: i64,
    pub stage_id: i64,
    pub instance_id: i64,
    pub database_id: Option<i64>,
    pub name: String,
    pub status: TaskStatus,
    pub task_type: TaskType,
    pub payload: String,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFind {
    pub id: Option<i64>,
    pub pipeline_id: Option<i64>,
    pub stage_id: Option<i64>,
    pub statuses: Option<Vec<TaskStatus>>,
    pub instance_id: Option<i64>,
    pub database_id: Option<i64>,
}

impl TaskFind {
    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn by_status(status: TaskStatus) -> Self {
        Self {
            statuses: Some(vec![status]),
            ..Default::default()
        }
    }

    pub(crate) fn is_id_only(&self) -> bool {
        self.id.is_some()
            && self.pipeline_id.is_none()
            && self.stage_id.is_none()
            && self.statuses.is_none()
            && self.instance_id.is_none()
            && self.database_id.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct TaskPatch {
    pub id: i64,
    pub updater_id: i64,
    pub status: Option<TaskStatus>,
    pub payload: Option<String>,
}

impl TaskPatch {
    pub fn status(id: i64, updater_id: i64, status: TaskStatus) -> Self {
        Self {
            id,
            updater_id,
            status: Some(status),
            payload: None,
        }
    }
}

/// Payload of a `backup` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDatabaseBackupPayload {
    pub backup_id: i64,
}

/// Payload of a `migration` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMigrationPayload {
    pub statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
}

/// Payload of a `sync` task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSyncPayload {}

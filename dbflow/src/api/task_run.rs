use serde::{Deserialize, Serialize};

use super::string_enum;

string_enum! {
    pub enum TaskRunStatus {
        Running => "RUNNING",
        Done => "DONE",
        Failed => "FAILED",
        Canceled => "CANCELED",
    }
}

/// Outcome reported by an executor, persisted as the run's result payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunResult {
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl TaskRunResult {
    pub fn detail(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            version: None,
        }
    }
}

/// One execution attempt of a task. History is append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: i64,
    pub creator_id: i64,
    pub created_ts: i64,
    pub updater_id: i64,
    pub updated_ts: i64,
    pub task_id: i64,
    /// 1-based attempt number, unique per task.
    pub attempt: i64,
    pub name: String,
    pub status: TaskRunStatus,
    pub result: Option<TaskRunResult>,
    pub comment: String,
    pub started_ts: i64,
    pub ended_ts: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct TaskRunCreate {
    pub creator_id: i64,
    pub task_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct TaskRunFind {
    pub id: Option<i64>,
    pub task_id: Option<i64>,
    pub statuses: Option<Vec<TaskRunStatus>>,
}

impl TaskRunFind {
    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn by_task(task_id: i64) -> Self {
        Self {
            task_id: Some(task_id),
            ..Default::default()
        }
    }

    pub fn running_for(task_id: i64) -> Self {
        Self {
            task_id: Some(task_id),
            statuses: Some(vec![TaskRunStatus::Running]),
            ..Default::default()
        }
    }

    pub(crate) fn is_id_only(&self) -> bool {
        self.id.is_some() && self.task_id.is_none() && self.statuses.is_none()
    }
}

/// Terminal update of a run. A finished run also gets its end timestamp.
#[derive(Debug, Clone)]
pub struct TaskRunPatch {
    pub id: i64,
    pub updater_id: i64,
    pub status: TaskRunStatus,
    pub result: Option<TaskRunResult>,
    pub comment: Option<String>,
}

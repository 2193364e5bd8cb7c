use serde::{Deserialize, Serialize};

use super::string_enum;
use super::task::TaskStatus;

string_enum! {
    /// Stage status, derived from the statuses of its tasks. Never persisted.
    pub enum StageStatus {
        Pending => "PENDING",
        Running => "RUNNING",
        Done => "DONE",
        Failed => "FAILED",
        Canceled => "CANCELED",
    }
}

impl StageStatus {
    /// Aggregate task statuses into a stage status.
    ///
    /// An empty stage is `Done`. A failed task dominates, then a canceled one.
    pub fn derive<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = TaskStatus>,
    {
        let mut all_done = true;
        let mut any_running = false;
        let mut any_failed = false;
        let mut any_canceled = false;

        for status in statuses {
            match status {
                TaskStatus::Done => {}
                TaskStatus::Failed => any_failed = true,
                TaskStatus::Canceled => any_canceled = true,
                TaskStatus::Running => any_running = true,
                TaskStatus::Pending | TaskStatus::PendingApproval => {}
            }
            if status != TaskStatus::Done {
                all_done = false;
            }
        }

        if all_done {
            StageStatus::Done
        } else if any_failed {
            StageStatus::Failed
        } else if any_canceled {
            StageStatus::Canceled
        } else if any_running {
            StageStatus::Running
        } else {
            StageStatus::Pending
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: i64,
    pub creator_id: i64,
    pub created_ts: i64,
    pub updater_id: i64,
    pub updated_ts: i64,
    pub pipeline_id: i64,
    /// Ordinal within the pipeline, unique and strictly increasing.
    pub position: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct StageCreate {
    pub creator_id: i64,
    pub pipeline_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct StageFind {
    pub id: Option<i64>,
    pub pipeline_id: Option<i64>,
}

impl StageFind {
    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn by_pipeline(pipeline_id: i64) -> Self {
        Self {
            pipeline_id: Some(pipeline_id),
            ..Default::default()
        }
    }

    pub(crate) fn is_id_only(&self) -> bool {
        self.id.is_some() && self.pipeline_id.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct StagePatch {
    pub id: i64,
    pub updater_id: i64,
    pub name: Option<String>,
}

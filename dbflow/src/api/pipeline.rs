use serde::{Deserialize, Serialize};

use super::string_enum;

string_enum! {
    /// Pipeline status. Never regresses once `Done` or `Canceled`.
    pub enum PipelineStatus {
        Open => "OPEN",
        Done => "DONE",
        Canceled => "CANCELED",
    }
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Done | PipelineStatus::Canceled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    pub creator_id: i64,
    pub created_ts: i64,
    pub updater_id: i64,
    pub updated_ts: i64,
    pub name: String,
    pub status: PipelineStatus,
}

#[derive(Debug, Clone)]
pub struct PipelineCreate {
    pub creator_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineFind {
    pub id: Option<i64>,
    pub status: Option<PipelineStatus>,
}

impl PipelineFind {
    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub(crate) fn is_id_only(&self) -> bool {
        self.id.is_some() && self.status.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct PipelinePatch {
    pub id: i64,
    pub updater_id: i64,
    pub status: Option<PipelineStatus>,
}

use serde::{Deserialize, Serialize};

use dbflow_shared::errors::DbflowResult;

use crate::api::string_enum;

string_enum! {
    pub enum AdviceStatus {
        Success => "SUCCESS",
        Warn => "WARN",
        Error => "ERROR",
    }
}

/// One finding reported by an [`Advisor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    pub status: AdviceStatus,
    pub code: i32,
    pub title: String,
    pub content: String,
}

impl Advice {
    pub fn ok() -> Self {
        Self {
            status: AdviceStatus::Success,
            code: 0,
            title: "OK".to_string(),
            content: String::new(),
        }
    }
}

/// SQL review rule applied to a migration statement.
pub trait Advisor: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, statement: &str) -> DbflowResult<Vec<Advice>>;
}

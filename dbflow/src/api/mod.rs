//! Domain types for the task execution pipeline.
//!
//! ```text
//! Pipeline → Stages → Tasks → TaskRuns
//!
//! - Pipeline: ordered workflow for one change request
//! - Stage: ordered phase gating progression to the next stage
//! - Task: single unit of work (migration, backup, sync)
//! - TaskRun: one execution attempt of a task
//! ```
//!
//! Instances and databases are weak, lookup-only references.

mod backup;
mod instance;
mod pipeline;
mod stage;
mod task;
mod task_run;

pub use backup::{
    Backup, BackupCreate, BackupFind, BackupPatch, BackupStatus, BackupStorageBackend, BackupType,
};
pub use instance::{Database, DatabaseCreate, DatabaseFind, Instance, InstanceCreate, InstanceFind};
pub use pipeline::{Pipeline, PipelineCreate, PipelineFind, PipelinePatch, PipelineStatus};
pub use stage::{Stage, StageCreate, StageFind, StagePatch, StageStatus};
pub use task::{
    Task, TaskCreate, TaskDatabaseBackupPayload, TaskFind, TaskMigrationPayload, TaskPatch,
    TaskStatus, TaskSyncPayload, TaskType,
};
pub use task_run::{TaskRun, TaskRunCreate, TaskRunFind, TaskRunPatch, TaskRunResult, TaskRunStatus};

/// Principal id used for mutations made by the system itself.
pub const SYSTEM_BOT_ID: i64 = 1;

/// Declares a string-backed status enum with `as_str`/`parse` helpers.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use string_enum;

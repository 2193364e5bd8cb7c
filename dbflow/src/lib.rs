//! dbflow: task execution pipeline for database change management.
//!
//! Pipelines of ordered stages hold tasks (migrations, backups, syncs) that a
//! polling [`scheduler::Scheduler`] dispatches to per-type executors. State
//! lives in SQLite behind cache-accelerated stores; database engines and
//! object storage are reached through the capability traits in [`plugin`].

pub mod api;
pub mod db;
pub mod executor;
mod logging;
pub mod plugin;
pub mod runtime;
pub mod scheduler;

pub use dbflow_shared::{DbflowError, DbflowResult, ErrorCode};
pub use logging::init_logging_for;
pub use runtime::{Capabilities, DbflowOptions, DbflowRuntime, FilesystemLayout};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerMetrics};

//! Runtime configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dbflow_shared::errors::{DbflowError, DbflowResult};

use crate::scheduler::SchedulerConfig;

/// Environment variable overriding the default data dir.
pub const DBFLOW_HOME_ENV: &str = "DBFLOW_HOME";

const DEFAULT_MIN_BACKUP_FREE_BYTES: u64 = 500 * 1024 * 1024;

/// Options for a [`crate::DbflowRuntime`].
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DbflowOptions {
    /// Root of all persistent state: database, logs, local backups.
    pub data_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub max_concurrent_tasks: usize,
    pub task_timeout_secs: u64,
    /// Local backups refuse to start below this much free space.
    pub min_backup_free_bytes: u64,
}

impl Default for DbflowOptions {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            poll_interval_ms: 1000,
            max_concurrent_tasks: 8,
            task_timeout_secs: 60 * 60,
            min_backup_free_bytes: DEFAULT_MIN_BACKUP_FREE_BYTES,
        }
    }
}

/// `$DBFLOW_HOME`, else `~/.dbflow`.
pub fn default_data_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(DBFLOW_HOME_ENV) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dbflow")
}

impl DbflowOptions {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load options from a JSON file.
    pub fn from_file(path: &Path) -> DbflowResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DbflowError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| DbflowError::Config(format!("invalid options in {}: {}", path.display(), e)))
    }

    /// Validate before any filesystem work.
    pub fn sanitize(self) -> DbflowResult<Self> {
        if !self.data_dir.is_absolute() {
            return Err(DbflowError::Config(format!(
                "data_dir must be absolute path, got: {}",
                self.data_dir.display()
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(DbflowError::Config(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(DbflowError::Config(
                "max_concurrent_tasks must be greater than 0".to_string(),
            ));
        }
        if self.task_timeout_secs == 0 {
            return Err(DbflowError::Config(
                "task_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: self.poll_interval(),
            max_concurrent_tasks: self.max_concurrent_tasks,
            task_timeout: self.task_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let options = DbflowOptions::with_data_dir("/var/lib/dbflow");
        assert_eq!(options.max_concurrent_tasks, 8);
        assert_eq!(options.min_backup_free_bytes, 500 * 1024 * 1024);
        assert_eq!(options.task_timeout(), Duration::from_secs(3600));
        assert!(options.sanitize().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dbflow.json");
        std::fs::write(
            &path,
            r#"{"dataDir": "/srv/dbflow", "maxConcurrentTasks": 2}"#,
        )
        .unwrap();

        let options = DbflowOptions::from_file(&path).unwrap();
        assert_eq!(options.data_dir, PathBuf::from("/srv/dbflow"));
        assert_eq!(options.max_concurrent_tasks, 2);
        assert_eq!(options.poll_interval_ms, 1000);
    }

    #[test]
    fn test_from_file_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dbflow.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            DbflowOptions::from_file(&path),
            Err(DbflowError::Config(_))
        ));
    }

    #[test]
    fn test_sanitize_rejects_bad_values() {
        assert!(DbflowOptions::with_data_dir("relative/dir").sanitize().is_err());

        let mut options = DbflowOptions::with_data_dir("/tmp/dbflow");
        options.max_concurrent_tasks = 0;
        assert!(matches!(options.sanitize(), Err(DbflowError::Config(_))));
    }
}

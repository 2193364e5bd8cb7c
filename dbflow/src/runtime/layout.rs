//! On-disk layout under the data dir.
//!
//! ```text
//! <data_dir>/
//!   db/dbflow.db
//!   logs/dbflow.<date>.log
//!   backup/db/<database_id>/<name>.sql
//! ```

use std::path::{Path, PathBuf};

use dbflow_shared::errors::DbflowResult;

#[derive(Debug, Clone)]
pub struct FilesystemLayout {
    data_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn db_dir(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir().join("dbflow.db")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join("backup")
    }

    /// Create every directory the runtime writes to.
    pub fn prepare(&self) -> DbflowResult<()> {
        for dir in [
            self.data_dir.clone(),
            self.db_dir(),
            self.logs_dir(),
            self.backup_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

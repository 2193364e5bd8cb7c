use std::path::Path;

use dbflow_shared::errors::{DbflowError, DbflowResult};

/// Reports free space on the filesystem holding a path.
pub trait DiskProbe: Send + Sync {
    /// Bytes available to unprivileged users at `path`.
    fn available_bytes(&self, path: &Path) -> DbflowResult<u64>;
}

/// [`DiskProbe`] backed by `statvfs(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl DiskProbe for StatvfsProbe {
    fn available_bytes(&self, path: &Path) -> DbflowResult<u64> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|e| {
            DbflowError::Storage(format!(
                "failed to get available file system space at {}: {}",
                path.display(),
                e
            ))
        })?;
        #[allow(clippy::unnecessary_cast)]
        Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
    }
}

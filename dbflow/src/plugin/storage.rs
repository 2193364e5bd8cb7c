use tokio::io::AsyncRead;

use dbflow_shared::errors::DbflowResult;

/// Object-storage client used to ship backups off the host.
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    fn bucket(&self) -> &str;

    /// Upload everything readable from `body` under `key`.
    async fn upload_object(
        &self,
        key: &str,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> DbflowResult<()>;
}

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;

use dbflow_shared::errors::DbflowResult;

use crate::api::Instance;

/// Server-level facts gathered by [`Driver::sync_instance`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMetadata {
    pub version: String,
    pub roles: Vec<String>,
    pub databases: Vec<DatabaseSchemaMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSchemaMetadata {
    pub name: String,
    pub schemas: Vec<SchemaMetadata>,
}

impl DatabaseSchemaMetadata {
    pub fn table_count(&self) -> usize {
        self.schemas.iter().map(|s| s.tables.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaMetadata {
    pub name: String,
    pub tables: Vec<String>,
    pub views: Vec<String>,
}

/// A live connection to one database engine.
///
/// Obtained from a [`DriverFactory`] and released with [`Driver::close`].
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    async fn sync_instance(&self) -> DbflowResult<InstanceMetadata>;

    /// Sync the schema of the database this driver was opened for.
    async fn sync_db_schema(&self) -> DbflowResult<DatabaseSchemaMetadata>;

    /// Write a logical dump of `database` into `out`.
    ///
    /// Returns engine-specific dump metadata, persisted verbatim as the
    /// backup payload.
    async fn dump(
        &self,
        database: &str,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        schema_only: bool,
    ) -> DbflowResult<String>;

    /// Execute `statement`, returning the number of affected rows.
    async fn execute(&self, statement: &str) -> DbflowResult<i64>;

    async fn close(&self) -> DbflowResult<()>;
}

#[async_trait::async_trait]
pub trait DriverFactory: Send + Sync {
    /// Open an admin connection to `instance`.
    ///
    /// `database_name` is `None` for instance-level work such as syncing the
    /// list of databases.
    async fn admin_driver(
        &self,
        instance: &Instance,
        database_name: Option<&str>,
    ) -> DbflowResult<Box<dyn Driver>>;
}

use serde::{Deserialize, Serialize};

/// A database server. Lookup-only from the pipeline's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: i64,
    pub creator_id: i64,
    pub created_ts: i64,
    pub name: String,
    /// Engine tag understood by the driver factory, e.g. `POSTGRES`.
    pub engine: String,
    pub host: String,
    pub port: String,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct InstanceCreate {
    pub creator_id: i64,
    pub name: String,
    pub engine: String,
    pub host: String,
    pub port: String,
    pub username: String,
}

#[derive(Debug, Clone, Default)]
pub struct InstanceFind {
    pub id: Option<i64>,
    pub name: Option<String>,
}

impl InstanceFind {
    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub(crate) fn is_id_only(&self) -> bool {
        self.id.is_some() && self.name.is_none()
    }
}

/// A logical database on an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub id: i64,
    pub creator_id: i64,
    pub created_ts: i64,
    pub instance_id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseCreate {
    pub creator_id: i64,
    pub instance_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseFind {
    pub id: Option<i64>,
    pub instance_id: Option<i64>,
    pub name: Option<String>,
}

impl DatabaseFind {
    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub(crate) fn is_id_only(&self) -> bool {
        self.id.is_some() && self.instance_id.is_none() && self.name.is_none()
    }
}

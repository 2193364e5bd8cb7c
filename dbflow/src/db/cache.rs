//! Write-through entity cache.
//!
//! A side-table keyed by `(CacheKind, id)` holding serialized copies of
//! entities. Stores upsert on every successful write and read-miss; the
//! transactional store stays the source of truth.
//!
//! The cache is never invalidated on delete. That is safe because no cached
//! entity kind is ever hard-deleted (pipelines, stages, tasks, runs and
//! backups only change status). Callers that do delete must [`CacheService::evict`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use dbflow_shared::errors::{DbflowError, DbflowResult};

use crate::api::{Backup, Database, Instance, Pipeline, Stage, Task, TaskRun};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Pipeline,
    Stage,
    Task,
    TaskRun,
    Backup,
    Instance,
    Database,
}

/// An entity that can live in the [`CacheService`].
pub trait Cacheable: Serialize + DeserializeOwned {
    const KIND: CacheKind;

    fn cache_id(&self) -> i64;
}

macro_rules! cacheable {
    ($($ty:ty => $kind:ident),+ $(,)?) => {
        $(
            impl Cacheable for $ty {
                const KIND: CacheKind = CacheKind::$kind;

                fn cache_id(&self) -> i64 {
                    self.id
                }
            }
        )+
    };
}

cacheable! {
    Pipeline => Pipeline,
    Stage => Stage,
    Task => Task,
    TaskRun => TaskRun,
    Backup => Backup,
    Instance => Instance,
    Database => Database,
}

/// Process-local cache shared by all stores. Cheap to clone.
#[derive(Clone, Default)]
pub struct CacheService {
    entries: Arc<RwLock<HashMap<(CacheKind, i64), Vec<u8>>>>,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

impl CacheService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the cached copy of `value`.
    pub fn upsert<T: Cacheable>(&self, value: &T) -> DbflowResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| {
            DbflowError::Internal(format!(
                "failed to encode {:?} {} for cache: {}",
                T::KIND,
                value.cache_id(),
                e
            ))
        })?;
        self.entries.write().insert((T::KIND, value.cache_id()), bytes);
        Ok(())
    }

    /// Look up a cached copy by id.
    pub fn find<T: Cacheable>(&self, id: i64) -> DbflowResult<Option<T>> {
        let entries = self.entries.read();
        let Some(bytes) = entries.get(&(T::KIND, id)) else {
            return Ok(None);
        };
        let value = serde_json::from_slice(bytes).map_err(|e| {
            DbflowError::Internal(format!(
                "failed to decode cached {:?} {}: {}",
                T::KIND,
                id,
                e
            ))
        })?;
        Ok(Some(value))
    }

    /// Drop a cached entry. Required after a hard delete.
    pub fn evict(&self, kind: CacheKind, id: i64) {
        self.entries.write().remove(&(kind, id));
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PipelineStatus;

    fn pipeline(id: i64, status: PipelineStatus) -> Pipeline {
        Pipeline {
            id,
            creator_id: 1,
            created_ts: 100,
            updater_id: 1,
            updated_ts: 100,
            name: format!("pipeline-{id}"),
            status,
        }
    }

    #[test]
    fn test_upsert_and_find() {
        let cache = CacheService::new();
        assert!(cache.find::<Pipeline>(1).unwrap().is_none());

        cache.upsert(&pipeline(1, PipelineStatus::Open)).unwrap();
        assert_eq!(
            cache.find::<Pipeline>(1).unwrap(),
            Some(pipeline(1, PipelineStatus::Open))
        );

        cache.upsert(&pipeline(1, PipelineStatus::Done)).unwrap();
        assert_eq!(
            cache.find::<Pipeline>(1).unwrap().unwrap().status,
            PipelineStatus::Done
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let cache = CacheService::new();
        cache.upsert(&pipeline(5, PipelineStatus::Open)).unwrap();
        assert!(cache.find::<Task>(5).unwrap().is_none());
    }

    #[test]
    fn test_evict() {
        let cache = CacheService::new();
        cache.upsert(&pipeline(2, PipelineStatus::Open)).unwrap();
        cache.evict(CacheKind::Pipeline, 2);
        assert!(cache.find::<Pipeline>(2).unwrap().is_none());
        assert!(cache.is_empty());
    }
}

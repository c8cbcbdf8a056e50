use std::sync::Mutex;

use crate::{
    db::{Cache, CacheKey},
    error::{AppError, AppResult},
    models::CataloguePool,
};

/// Snapshots outlive several rebuild cycles so a cold start always has something
const SNAPSHOT_TTL: u64 = 604800; // 1 week

/// Durable storage for the catalogue pool, read once at startup
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> AppResult<Option<CataloguePool>>;

    async fn save(&self, pool: &CataloguePool) -> AppResult<()>;

    fn name(&self) -> &'static str;
}

/// Stores the snapshot in Redis through the shared cache
pub struct RedisSnapshotStore {
    cache: Cache,
}

impl RedisSnapshotStore {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }
}

#[async_trait::async_trait]
impl SnapshotStore for RedisSnapshotStore {
    async fn load(&self) -> AppResult<Option<CataloguePool>> {
        self.cache.get_from_cache(&CacheKey::CatalogueSnapshot).await
    }

    async fn save(&self, pool: &CataloguePool) -> AppResult<()> {
        self.cache
            .set_in_background(&CacheKey::CatalogueSnapshot, pool, SNAPSHOT_TTL);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Process-local snapshot, lost on restart
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshot: Mutex<Option<CataloguePool>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(pool: CataloguePool) -> Self {
        Self {
            snapshot: Mutex::new(Some(pool)),
        }
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> AppResult<Option<CataloguePool>> {
        let snapshot = self
            .snapshot
            .lock()
            .map_err(|e| AppError::Internal(format!("Snapshot lock poisoned: {}", e)))?;
        Ok(snapshot.clone())
    }

    async fn save(&self, pool: &CataloguePool) -> AppResult<()> {
        let mut snapshot = self
            .snapshot
            .lock()
            .map_err(|e| AppError::Internal(format!("Snapshot lock poisoned: {}", e)))?;
        *snapshot = Some(pool.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use redis::Client;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell};

use crate::error::{AppError, AppResult};

/// Every key this service writes lives under this namespace
const KEY_PREFIX: &str = "cinepair";

/// Bumped whenever a cached payload changes shape, so stale entries read as misses
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    TitleLookup { title: String, year: Option<i32> },
    MovieDetails(u64),
    BucketPage { bucket: String, page: u32 },
    CatalogueSnapshot,
}

impl CacheKey {
    /// Full redis key including namespace and schema version
    pub fn redis_key(&self) -> String {
        format!("{}:v{}:{}", KEY_PREFIX, SCHEMA_VERSION, self)
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::TitleLookup { title, year } => match year {
                Some(year) => write!(f, "title:{}:{}", title.trim().to_lowercase(), year),
                None => write!(f, "title:{}", title.trim().to_lowercase()),
            },
            CacheKey::MovieDetails(id) => write!(f, "movie:{}", id),
            CacheKey::BucketPage { bucket, page } => {
                write!(f, "bucket:{}:{}", bucket.to_lowercase().replace(' ', "_"), page)
            }
            CacheKey::CatalogueSnapshot => write!(f, "catalogue:snapshot"),
        }
    }
}

/// Creates a Redis client for caching
///
/// The client is lazy; no connection is made until the first command.
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// One multiplexed connection shared by readers and the writer task,
/// established on first use and retried on later calls if that fails
#[derive(Clone)]
struct SharedConnection {
    client: Client,
    manager: Arc<OnceCell<ConnectionManager>>,
}

impl SharedConnection {
    async fn get(&self) -> AppResult<ConnectionManager> {
        let manager = self
            .manager
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }
}

struct PendingWrite {
    key: String,
    value: String,
    ttl: u64,
}

/// Read-through cache for upstream lookups and the catalogue snapshot
#[derive(Clone)]
pub struct Cache {
    connection: SharedConnection,
    write_tx: mpsc::UnboundedSender<PendingWrite>,
}

/// Stops the writer task after flushing what is already queued
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheWriterHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
    }
}

impl Cache {
    /// Creates the cache and spawns its writer task
    ///
    /// Writes go through a channel so persisting a value never blocks a
    /// request or a catalogue build.
    pub fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let connection = SharedConnection {
            client: redis_client,
            manager: Arc::new(OnceCell::new()),
        };

        tokio::spawn(Self::run_writer(connection.clone(), write_rx, shutdown_rx));

        let cache = Self {
            connection,
            write_tx,
        };

        (cache, CacheWriterHandle { shutdown_tx })
    }

    async fn run_writer(
        connection: SharedConnection,
        mut write_rx: mpsc::UnboundedReceiver<PendingWrite>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::debug!("Cache writer started");

        loop {
            tokio::select! {
                Some(write) = write_rx.recv() => {
                    let key = write.key.clone();
                    if let Err(e) = Self::write(&connection, write).await {
                        tracing::warn!(error = %e, key = %key, "Cache write failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    let mut flushed = 0;
                    while let Ok(write) = write_rx.try_recv() {
                        match Self::write(&connection, write).await {
                            Ok(()) => flushed += 1,
                            Err(e) => {
                                tracing::warn!(error = %e, "Cache write failed during shutdown")
                            }
                        }
                    }

                    tracing::info!(flushed = flushed, "Cache writer stopped");
                    break;
                }
            }
        }
    }

    async fn write(connection: &SharedConnection, write: PendingWrite) -> AppResult<()> {
        let mut conn = connection.get().await?;
        let _: () = conn.set_ex(write.key, write.value, write.ttl).await?;
        Ok(())
    }

    /// Cached value for `key`, `None` on a miss
    ///
    /// A payload that no longer deserializes is reported as an error rather
    /// than silently treated as a miss.
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<T>> {
        let mut conn = self.connection.get().await?;
        let cached: Option<String> = conn.get(key.redis_key()).await?;

        let Some(json) = cached else {
            return Ok(None);
        };

        let value = serde_json::from_str(&json)
            .map_err(|e| {
                AppError::Internal(format!("Cache payload for {} is invalid: {}", key, e))
            })?;
        tracing::debug!(key = %key, "Cache hit");
        Ok(Some(value))
    }

    /// Queues `value` for writing with a TTL in seconds; failures are logged
    pub fn set_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, key = %key, "Cache serialization error");
                return;
            }
        };

        let write = PendingWrite {
            key: key.redis_key(),
            value: json,
            ttl,
        };

        if self.write_tx.send(write).is_err() {
            tracing::warn!(key = %key, "Cache writer has stopped, dropping write");
        }
    }
}

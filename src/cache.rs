//! Short-lived cache in front of the exchange-rate provider.
//!
//! The snapshot is stored as a single JSON value under one key, so a reader
//! never sees the reporting date of one rate next to the value of another.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::{self, CacheBackend};
use crate::error::{CacheError, RateError};
use crate::model::RateSnapshot;
use crate::rates::RateProviderFactory;

/// String key/value store with per-key TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
}

const REDIS_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis-backed store; one multiplexed connection per operation.
#[derive(Clone)]
pub struct RedisCacheStore {
    client: redis::Client,
}

impl RedisCacheStore {
    pub fn new(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        info!("Redis client created");
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        match tokio::time::timeout(
            REDIS_OP_TIMEOUT,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(conn) => Ok(conn?),
            Err(_) => Err(CacheError::Unavailable("redis connect timed out".into())),
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(CacheError::from)
    }
}

/// In-process store, expiring entries against the tokio clock.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Unavailable("memory cache poisoned".into()))
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| CacheError::Unavailable(format!("ttl {ttl:?} out of range")))?;
        self.lock()?
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.lock().map(|_| ())
    }
}

/// Build the store selected by `cache.backend`.
pub fn store_from_config(cfg: &config::Cache) -> Result<Arc<dyn CacheStore>, CacheError> {
    Ok(match cfg.backend {
        CacheBackend::Redis => Arc::new(RedisCacheStore::new(&cfg.url)?),
        CacheBackend::Memory => Arc::new(MemoryCacheStore::new()),
    })
}

/// Read-through rate cache. Backend failures are logged and treated as a
/// miss; they never reach the caller.
#[derive(Clone)]
pub struct RateCache {
    store: Arc<dyn CacheStore>,
    key: String,
    ttl: Duration,
}

impl RateCache {
    pub fn new(store: Arc<dyn CacheStore>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
        }
    }

    /// Cached snapshot, or `None` on miss, expiry, decode failure or backend error.
    pub async fn get_cached_rate(&self) -> Option<RateSnapshot> {
        let raw = match self.store.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, key = %self.key, "rate cache read failed");
                return None;
            }
        };
        match serde_json::from_str::<RateSnapshot>(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(error = %err, key = %self.key, "discarding undecodable cached rate");
                None
            }
        }
    }

    pub async fn store_rate(&self, as_of: &str, value: f64, ttl: Duration) {
        let snapshot = RateSnapshot::new(as_of, value);
        let raw = match serde_json::to_string(&snapshot) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "failed to encode rate snapshot");
                return;
            }
        };
        if let Err(err) = self.store.set(&self.key, &raw, ttl).await {
            warn!(error = %err, key = %self.key, "rate cache write failed");
        }
    }

    /// Cached snapshot if present; otherwise open a provider, fetch, cache
    /// with the configured TTL and return. The provider is dropped before
    /// this returns.
    #[instrument(skip_all)]
    pub async fn get_or_fetch(
        &self,
        factory: &dyn RateProviderFactory,
    ) -> Result<RateSnapshot, RateError> {
        if let Some(hit) = self.get_cached_rate().await {
            debug!(as_of = %hit.as_of, value = hit.value, "rate cache hit");
            return Ok(hit);
        }

        let snapshot = {
            let provider = factory.open()?;
            provider.fetch_rate().await?
        };
        info!(as_of = %snapshot.as_of, value = snapshot.value, "fetched fresh rate");
        self.store_rate(&snapshot.as_of, snapshot.value, self.ttl)
            .await;
        Ok(snapshot)
    }
}

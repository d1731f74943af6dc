//! Result caching.
//!
//! Successful resolutions are cached under their pre-canonicalized input
//! URL, either in process memory (bounded, TTL-evicting) or in Redis with a
//! server-side TTL. Failed resolves are never cached here; negative
//! caching belongs to the HTTP façade's short-lived Cache-Control headers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use moka::future::Cache;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};

use crate::canonical::pre_canonicalize;
use crate::resolver::{Resolution, ResolveResult, Resolver};

/// Bumped whenever the cached value schema changes, so stale entries from
/// older deployments read as misses.
const CACHE_KEY_VERSION: &str = "1";

/// A key-value store for resolutions. A miss is not an error.
#[async_trait]
pub trait ResolveCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Resolution>;
    async fn add(&self, key: &str, value: Resolution);
    /// For logs and instrumentation.
    fn name(&self) -> &'static str;
}

/// Bounded in-memory cache with per-entry TTL.
pub struct MemoryCache {
    cache: Cache<String, Resolution>,
}

impl MemoryCache {
    /// Creates an in-memory cache.
    ///
    /// # Arguments
    ///
    /// * `max_capacity` - Maximum number of entries before eviction
    /// * `ttl` - Time-to-live for each entry, counted from insertion
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }
}

#[async_trait]
impl ResolveCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Resolution> {
        self.cache.get(key).await
    }

    async fn add(&self, key: &str, value: Resolution) {
        self.cache.insert(key.to_string(), value).await;
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Redis-backed cache storing resolutions as JSON with a server-side TTL.
///
/// Cache errors are logged and degrade to misses; the resolver must keep
/// working when Redis is unavailable.
pub struct RedisCache {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisCache {
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self { conn, ttl }
    }

    /// Connects to the Redis instance at `url`.
    pub async fn connect(url: &str, ttl: Duration) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::new(conn, ttl))
    }
}

/// Keys are hashed so arbitrary input URLs cannot produce oversized or
/// unprintable Redis keys.
fn storage_key(key: &str) -> String {
    format!(
        "cache:{CACHE_KEY_VERSION}:{}",
        hex::encode(Sha256::digest(key.as_bytes()))
    )
}

#[async_trait]
impl ResolveCache for RedisCache {
    async fn get(&self, key: &str) -> Option<Resolution> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<String>>(storage_key(key)).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!("discarding undecodable cache entry for {key}: {err}");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!("cache read failed for {key}: {err}");
                None
            }
        }
    }

    async fn add(&self, key: &str, value: Resolution) {
        let raw = match serde_json::to_string(&value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("failed to serialize cache entry for {key}: {err}");
                return;
            }
        };
        let mut conn = self.conn.clone();
        if let Err(err) = conn
            .set_ex::<_, _, ()>(storage_key(key), raw, self.ttl.as_secs())
            .await
        {
            warn!("cache write failed for {key}: {err}");
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Wraps a resolver with a result cache keyed by pre-canonicalized input.
pub struct CachedResolver<R> {
    inner: R,
    cache: Arc<dyn ResolveCache>,
}

impl<R: Resolver> CachedResolver<R> {
    pub fn new(inner: R, cache: Arc<dyn ResolveCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<R: Resolver> Resolver for CachedResolver<R> {
    async fn resolve(&self, url: &str) -> ResolveResult {
        let key = pre_canonicalize(url);

        if let Some(hit) = self.cache.get(&key).await {
            debug!("cache hit ({}) for {key}", self.cache.name());
            return Ok(hit);
        }

        let outcome = self.inner.resolve(url).await;
        // Only successful resolves are cached.
        if let Ok(resolution) = &outcome {
            self.cache.add(&key, resolution.clone()).await;
        }
        outcome
    }
}

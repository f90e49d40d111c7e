//! Cache facade
//!
//! Memoizes JSON-serializable values behind a key with optional TTL. The
//! backend sits behind [`CacheStore`] so the Redis-backed deployment and
//! the in-process fallback (also used by tests) share call sites.
//!
//! `get_or_set` is not single-flight: concurrent misses may both compute
//! and both write, and the last write wins.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Key/value backend with optional per-entry TTL.
///
/// Misses are `Ok(None)`; only backend faults are errors.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: &Value, ttl_secs: Option<u64>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn clear(&self) -> Result<()>;
}

/// Redis-backed store. Values are stored as JSON strings; expiry is
/// delegated to the server, so a read after TTL is simply absent.
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await.context("Redis GET failed")?;
        match raw {
            Some(payload) => {
                let value = serde_json::from_str(&payload)
                    .with_context(|| format!("Malformed cached value for key {key}"))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl_secs: Option<u64>) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        match ttl_secs {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(key, payload, ttl)
                    .await
                    .context("Redis SETEX failed")?;
            }
            None => {
                let _: () = conn.set(key, payload).await.context("Redis SET failed")?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await.context("Redis DEL failed")?;
        Ok(removed > 0)
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .context("Redis FLUSHDB failed")?;
        Ok(())
    }
}

/// In-process store used when Redis is disabled and by tests.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, (Value, Option<DateTime<Utc>>)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Utc::now();
        if self
            .entries
            .remove_if(key, |_, (_, expires)| matches!(expires, Some(at) if now > *at))
            .is_some()
        {
            return Ok(None);
        }
        Ok(self.entries.get(key).map(|entry| entry.0.clone()))
    }

    async fn set(&self, key: &str, value: &Value, ttl_secs: Option<u64>) -> Result<()> {
        let expires = ttl_secs.map(|ttl| Utc::now() + Duration::seconds(ttl as i64));
        self.entries.insert(key.to_string(), (value.clone(), expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

/// The facade handlers talk to.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.store.get(key).await
    }

    pub async fn set(&self, key: &str, value: &Value, ttl_secs: Option<u64>) -> Result<()> {
        self.store.set(key, value, ttl_secs).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete(key).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// No locking: concurrent misses may each run `compute`; last write
    /// wins.
    pub async fn get_or_set<F, Fut>(&self, key: &str, ttl_secs: Option<u64>, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if let Some(cached) = self.get(key).await? {
            return Ok(cached);
        }

        let value = compute().await?;
        self.set(key, &value, ttl_secs).await?;
        Ok(value)
    }
}

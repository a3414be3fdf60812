//! Volatile key/value cache with TTL and integer counters.
//!
//! The cache is never authoritative: callers treat every error as a miss and
//! fall back to the [`ChatRepository`](crate::ChatRepository).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rcommon::{BoxFuture, SessionId};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backends::redis_cache::{DEFAULT_REDIS_URL, RedisCache};
use crate::error::StoreError;

pub trait VolatileCache: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>>;

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Adds one to the counter at `key`, treating a missing key as zero.
    fn increment<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<i64, StoreError>>;

    /// Subtracts one from the counter at `key`, treating a missing key as zero.
    fn decrement<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<i64, StoreError>>;
}

pub fn history_key(session_id: &SessionId) -> String {
    format!("history:{session_id}")
}

pub fn transcript_key(session_id: &SessionId) -> String {
    format!("session:{session_id}:full")
}

pub fn online_key(session_id: &SessionId) -> String {
    format!("session:{session_id}:online")
}

/// Reads and decodes a JSON entry. Undecodable payloads count as a miss.
pub async fn get_json<T>(cache: &dyn VolatileCache, key: &str) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
{
    let Some(raw) = cache.get(key).await? else {
        return Ok(None);
    };

    match serde_json::from_str::<T>(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(error) => {
            tracing::warn!(key, error = %error, "discarding undecodable cache entry");
            Ok(None)
        }
    }
}

pub async fn set_json<T>(
    cache: &dyn VolatileCache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
{
    let raw = serde_json::to_string(value)
        .map_err(|error| StoreError::cache(format!("failed to encode cache entry: {error}")))?;
    cache.set(key, raw, ttl).await
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheConfig {
    #[default]
    Memory,
    Disabled,
    Redis {
        url: String,
    },
}

impl CacheConfig {
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            "redis" => Ok(Self::Redis {
                url: DEFAULT_REDIS_URL.to_string(),
            }),
            other => Err(StoreError::invalid_request(format!(
                "unknown cache backend '{other}'"
            ))),
        }
    }

    /// Points a Redis config at `url`. Other backends are returned unchanged.
    pub fn with_redis_url(self, url: Option<String>) -> Self {
        match (self, url) {
            (Self::Redis { .. }, Some(url)) => Self::Redis { url },
            (config, _) => config,
        }
    }
}

/// Builds the configured cache.
///
/// An unreachable Redis server does not stop startup: the relay logs it and
/// runs with a [`DisabledCache`], reading everything from the store.
pub async fn create_cache(config: CacheConfig) -> Arc<dyn VolatileCache> {
    match config {
        CacheConfig::Memory => Arc::new(InMemoryCache::new()),
        CacheConfig::Disabled => Arc::new(DisabledCache),
        CacheConfig::Redis { url } => match RedisCache::connect(&url).await {
            Ok(cache) => Arc::new(cache),
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    "redis unavailable, continuing without cache"
                );
                Arc::new(DisabledCache)
            }
        },
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    swept_at: Instant,
}

impl CacheState {
    /// Drops every expired entry, at most once per `interval`.
    fn sweep(&mut self, now: Instant, interval: Duration) {
        if now.duration_since(self.swept_at) < interval {
            return;
        }
        self.entries.retain(|_, entry| entry.is_live(now));
        self.swept_at = now;
    }
}

/// Process-local cache. Expired entries are dropped on read and by a
/// periodic sweep on write.
#[derive(Debug)]
pub struct InMemoryCache {
    state: Mutex<CacheState>,
    sweep_interval: Duration,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                swept_at: Instant::now(),
            }),
            sweep_interval,
        }
    }

    /// Entries currently held in memory, expired or not.
    pub fn resident_entries(&self) -> usize {
        self.state.lock().map_or(0, |state| state.entries.len())
    }

    fn state(&self) -> Result<MutexGuard<'_, CacheState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::cache("in-memory cache lock poisoned"))
    }

    fn add(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut state = self.state()?;
        let now = Instant::now();
        state.sweep(now, self.sweep_interval);

        let live = state.entries.get(key).filter(|entry| entry.is_live(now));
        let current = match live {
            Some(entry) => entry.value.parse::<i64>().map_err(|_| {
                StoreError::cache(format!("value at '{key}' is not an integer"))
            })?,
            None => 0,
        };
        let expires_at = live.and_then(|entry| entry.expires_at);

        let next = current + delta;
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }
}

impl VolatileCache for InMemoryCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>> {
        Box::pin(async move {
            let mut state = self.state()?;
            let now = Instant::now();
            match state.entries.get(key) {
                Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
                Some(_) => {
                    state.entries.remove(key);
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.state()?;
            let now = Instant::now();
            state.sweep(now, self.sweep_interval);
            state.entries.insert(
                key.to_string(),
                CacheEntry {
                    value,
                    expires_at: Some(now + ttl),
                },
            );
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.state()?.entries.remove(key);
            Ok(())
        })
    }

    fn increment<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move { self.add(key, 1) })
    }

    fn decrement<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move { self.add(key, -1) })
    }
}

/// A cache that stores nothing. Reads always miss and counters stay at zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCache;

impl VolatileCache for DisabledCache {
    fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>> {
        Box::pin(async { Ok(None) })
    }

    fn set<'a>(
        &'a self,
        _key: &'a str,
        _value: String,
        _ttl: Duration,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async { Ok(()) })
    }

    fn delete<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async { Ok(()) })
    }

    fn increment<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async { Ok(0) })
    }

    fn decrement<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async { Ok(0) })
    }
}

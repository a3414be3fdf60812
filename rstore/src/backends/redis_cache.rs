use std::time::Duration;

use rcommon::BoxFuture;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::cache::VolatileCache;
use crate::error::StoreError;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared cache on a Redis server. Lets several relay instances see the same
/// history entries and online counters.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connects once; the manager reconnects on its own after that.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        if url.trim().is_empty() {
            return Err(StoreError::invalid_request("redis url cannot be empty"));
        }

        let client = redis::Client::open(url)
            .map_err(|error| StoreError::invalid_request(format!("invalid redis url: {error}")))?;

        let connection = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::cache("timed out connecting to redis"))?
            .map_err(|error| StoreError::cache(format!("failed to connect to redis: {error}")))?;

        tracing::debug!("redis cache ready");
        Ok(Self { connection })
    }
}

fn cache_error(operation: &str, error: redis::RedisError) -> StoreError {
    StoreError::cache(format!("redis {operation} failed: {error}"))
}

/// Whole seconds for `SETEX`, rounded up so a sub-second TTL still lands.
fn ttl_seconds(ttl: Duration) -> u64 {
    let seconds = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        seconds + 1
    } else {
        seconds
    }
}

impl VolatileCache for RedisCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StoreError>> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            connection
                .get::<_, Option<String>>(key)
                .await
                .map_err(|error| cache_error("GET", error))
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let seconds = ttl_seconds(ttl);
            if seconds == 0 {
                // Already expired.
                return connection
                    .del::<_, ()>(key)
                    .await
                    .map_err(|error| cache_error("DEL", error));
            }
            connection
                .set_ex::<_, _, ()>(key, value, seconds)
                .await
                .map_err(|error| cache_error("SETEX", error))
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            connection
                .del::<_, ()>(key)
                .await
                .map_err(|error| cache_error("DEL", error))
        })
    }

    fn increment<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            connection
                .incr::<_, _, i64>(key, 1)
                .await
                .map_err(|error| cache_error("INCR", error))
        })
    }

    fn decrement<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            connection
                .decr::<_, _, i64>(key, 1)
                .await
                .map_err(|error| cache_error("DECR", error))
        })
    }
}

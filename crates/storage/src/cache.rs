// Redis Cache
//
// CacheStore over a multiplexed ConnectionManager. The manager reconnects on
// its own, so a cache outage only shows up as failed commands.

use std::env;
use std::time::Duration;

use analytics_core::{CacheError, CacheStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use tracing::info;

/// Configuration for the Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    /// Bound on establishing the initial connection
    pub connect_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `REDIS_URL`: Connection URL (default: redis://localhost:6379)
    /// - `REDIS_CONNECT_TIMEOUT_MS`: Initial connection bound in ms (default: 5000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env::var("REDIS_URL").unwrap_or(defaults.url),
            connect_timeout: env::var("REDIS_CONNECT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

fn command_error(command: &'static str) -> impl FnOnce(RedisError) -> CacheError {
    move |e| CacheError::Command {
        command,
        message: e.to_string(),
    }
}

/// Cache backed by Redis
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(config: &RedisConfig) -> Result<Self, CacheError> {
        let client =
            Client::open(config.url.as_str()).map_err(|e| CacheError::Connection(e.to_string()))?;

        let conn = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                CacheError::Connection(format!(
                    "timed out after {}ms connecting to redis",
                    config.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        info!("Connected to Redis");
        Ok(Self { conn })
    }

    pub async fn from_env() -> Result<Self, CacheError> {
        Self::connect(&RedisConfig::from_env()).await
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .map_err(command_error("SETEX"))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(command_error("GET"))
    }

    async fn lpush(&self, key: &str, value: String) -> Result<usize, CacheError> {
        let mut conn = self.conn.clone();
        conn.lpush(key, value).await.map_err(command_error("LPUSH"))
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.ltrim::<_, ()>(key, start, stop)
            .await
            .map_err(command_error("LTRIM"))
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.lrange(key, start, stop)
            .await
            .map_err(command_error("LRANGE"))
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1i64).await.map_err(command_error("INCR"))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        conn.expire(key, seconds)
            .await
            .map_err(command_error("EXPIRE"))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error("PING"))?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Command {
                command: "PING",
                message: format!("unexpected reply {:?}", pong),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RedisConfig::default();
        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let config = RedisConfig::default().with_url("not a url");
        let err = RedisCache::connect(&config).await.err().unwrap();
        assert!(matches!(err, CacheError::Connection(_)));
    }
}

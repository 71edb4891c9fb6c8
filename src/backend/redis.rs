//! Single-node Redis backing store.

use super::{ttl_from_reply, ttl_secs, BackingStore, Subscription};
use crate::config::CacheOptions;
use crate::error::{Error, Result};
use deadpool_redis::redis::{
    self, AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError,
};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use futures::StreamExt;
use std::time::Duration;

fn redis_error(e: RedisError) -> Error {
    let connection_failure =
        e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout();
    Error::from_redis(connection_failure, e)
}

fn connection_info(options: &CacheOptions) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(options.host.clone(), options.port),
        redis: RedisConnectionInfo {
            db: options.db,
            password: options.password.clone().filter(|p| !p.is_empty()),
            ..Default::default()
        },
    }
}

/// Redis backend over a bounded `deadpool-redis` connection pool.
///
/// Every new pooled connection authenticates (when a password is configured)
/// and selects the configured database, both carried by the connection info.
/// The pool has no wait timeout: when all `pool_size` connections are busy,
/// callers wait for one to come back.
///
/// # Example
///
/// ```no_run
/// # use dcache::backend::{BackingStore, RedisBackend};
/// # use dcache::{CacheOptions, error::Result};
/// # use std::time::Duration;
/// # async fn example() -> Result<()> {
/// let backend = RedisBackend::new(&CacheOptions::default())?;
/// backend.set("key", "value", Duration::from_secs(60)).await?;
/// let value = backend.get("key").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
    client: redis::Client,
    max_ttl: Duration,
}

impl RedisBackend {
    /// Build the connection pool. Connections are opened lazily on first use.
    ///
    /// # Errors
    /// Returns `Err` if the options are invalid or the pool cannot be created
    pub fn new(options: &CacheOptions) -> Result<Self> {
        options.validate()?;
        let info = connection_info(options);

        let mut config = Config::from_connection_info(info.clone());
        config.pool = Some(PoolConfig::new(options.pool_size));

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::ConfigError(format!("Failed to create connection pool: {}", e)))?;

        // Pub/sub needs its own connection outside the pool
        let client = redis::Client::open(info)
            .map_err(|e| Error::ConfigError(format!("Invalid Redis address: {}", e)))?;

        info!(
            "✓ Redis backend initialized with server: {}:{} db {} (pool size: {})",
            options.host, options.port, options.db, options.pool_size
        );

        Ok(RedisBackend {
            pool,
            client,
            max_ttl: options.max_ttl,
        })
    }

    async fn connection(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::ConnectionError(format!("Failed to get Redis connection: {}", e)))
    }
}

impl BackingStore for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await.map_err(redis_error)?;
        debug!(
            "✓ Redis GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let secs = ttl_secs(ttl, self.max_ttl);

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(secs)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;

        match reply.as_deref() {
            Some("OK") => {
                debug!("✓ Redis SET {} (TTL: {}s)", key, secs);
                Ok(())
            }
            other => Err(Error::ProtocolError(format!(
                "Redis SET for key {} replied {:?}",
                key, other
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn.del(key).await.map_err(redis_error)?;
        debug!("✓ Redis DELETE {} ({} removed)", key, removed);
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        conn.exists(key).await.map_err(redis_error)
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.connection().await?;
        let seconds: i64 = conn.ttl(key).await.map_err(redis_error)?;
        Ok(ttl_from_reply(seconds))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let receivers: i64 = conn.publish(channel, payload).await.map_err(redis_error)?;
        debug!("✓ Redis PUBLISH {} -> {} receiver(s)", channel, receivers);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(redis_error)?;
        pubsub.subscribe(channel).await.map_err(redis_error)?;
        info!("✓ Redis subscribed to channel {}", channel);

        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload::<String>().map_err(redis_error));
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_builds_lazy_pool() {
        // No server needed: connections are only opened on first use
        let backend = RedisBackend::new(&CacheOptions {
            pool_size: 4,
            ..Default::default()
        })
        .expect("Failed to build backend");
        assert_eq!(backend.pool.status().max_size, 4);
    }

    #[test]
    fn test_connection_info_carries_auth_and_db() {
        let info = connection_info(&CacheOptions {
            host: "::1".to_string(),
            port: 7000,
            password: Some("p@ss word".to_string()),
            db: 3,
            ..Default::default()
        });
        assert!(matches!(&info.addr, ConnectionAddr::Tcp(host, 7000) if host == "::1"));
        assert_eq!(info.redis.db, 3);
        assert_eq!(info.redis.password.as_deref(), Some("p@ss word"));

        let info = connection_info(&CacheOptions {
            password: Some(String::new()),
            ..Default::default()
        });
        assert!(info.redis.password.is_none());
    }

    #[tokio::test]
    async fn test_new_accepts_ipv6_host() {
        let backend = RedisBackend::new(&CacheOptions {
            host: "::1".to_string(),
            ..Default::default()
        })
        .expect("Failed to build backend");
        assert_eq!(backend.max_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn test_new_rejects_invalid_options() {
        let result = RedisBackend::new(&CacheOptions {
            pool_size: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }
}

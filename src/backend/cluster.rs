//! Clustered Redis backing store.
//!
//! Key routing and connection pooling are left to the cluster transport.
//! Pub/sub goes through a plain client on the seed node: cluster nodes
//! forward PUBLISH to every node, so one subscription sees all messages.

use super::{ttl_from_reply, ttl_secs, BackingStore, Subscription};
use crate::config::CacheOptions;
use crate::error::{Error, Result};
use ::redis::aio::ConnectionManager;
use ::redis::cluster::{ClusterClient, ClusterClientBuilder};
use ::redis::cluster_async::ClusterConnection;
use ::redis::{
    AsyncCommands, ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo,
    RedisError, RedisResult,
};
use futures::StreamExt;
use std::time::Duration;

fn redis_error(e: RedisError) -> Error {
    let connection_failure =
        e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout();
    Error::from_redis(connection_failure, e)
}

// Cluster nodes only have database 0, so no SELECT is sent
fn seed_info(options: &CacheOptions) -> RedisResult<ConnectionInfo> {
    let mut settings = RedisConnectionInfo::default();
    if let Some(password) = options.password.as_deref().filter(|p| !p.is_empty()) {
        settings = settings.set_password(password);
    }
    Ok(ConnectionAddr::Tcp(options.host.clone(), options.port)
        .into_connection_info()?
        .set_redis_settings(settings))
}

/// Redis Cluster backend.
#[derive(Clone)]
pub struct RedisClusterBackend {
    cluster: ClusterConnection,
    // Non-clustered seed node connection for PUBLISH; SUBSCRIBE opens its own
    publisher: ConnectionManager,
    client: ::redis::Client,
    max_ttl: Duration,
}

impl RedisClusterBackend {
    /// Connect to the cluster through the configured seed node.
    ///
    /// # Errors
    /// Returns `Err` if the options are invalid or the cluster is unreachable
    pub async fn new(options: &CacheOptions) -> Result<Self> {
        options.validate()?;
        if options.db != 0 {
            warn!(
                "Redis Cluster only has database 0, ignoring db {}",
                options.db
            );
        }

        let seed = seed_info(options)
            .map_err(|e| Error::ConfigError(format!("Invalid cluster address: {}", e)))?;

        let cluster_client: ClusterClient = ClusterClientBuilder::new(vec![seed.clone()])
            .build()
            .map_err(|e| Error::ConfigError(format!("Invalid cluster address: {}", e)))?;
        let cluster = cluster_client
            .get_async_connection()
            .await
            .map_err(redis_error)?;

        let client = ::redis::Client::open(seed)
            .map_err(|e| Error::ConfigError(format!("Invalid Redis address: {}", e)))?;
        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(redis_error)?;

        info!(
            "✓ Redis Cluster backend initialized with seed node: {}:{}",
            options.host, options.port
        );

        Ok(RedisClusterBackend {
            cluster,
            publisher,
            client,
            max_ttl: options.max_ttl,
        })
    }
}

impl BackingStore for RedisClusterBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.cluster.clone();
        let value: Option<String> = conn.get(key).await.map_err(redis_error)?;
        debug!(
            "✓ Redis Cluster GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.cluster.clone();
        let secs = ttl_secs(ttl, self.max_ttl);

        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(secs)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;

        match reply.as_deref() {
            Some("OK") => {
                debug!("✓ Redis Cluster SET {} (TTL: {}s)", key, secs);
                Ok(())
            }
            other => Err(Error::ProtocolError(format!(
                "Redis Cluster SET for key {} replied {:?}",
                key, other
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.cluster.clone();
        let removed: i64 = conn.del(key).await.map_err(redis_error)?;
        debug!("✓ Redis Cluster DELETE {} ({} removed)", key, removed);
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.cluster.clone();
        conn.exists(key).await.map_err(redis_error)
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.cluster.clone();
        let seconds: i64 = conn.ttl(key).await.map_err(redis_error)?;
        Ok(ttl_from_reply(seconds))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(channel, payload).await.map_err(redis_error)?;
        debug!(
            "✓ Redis Cluster PUBLISH {} -> {} receiver(s)",
            channel, receivers
        );
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(redis_error)?;
        pubsub.subscribe(channel).await.map_err(redis_error)?;
        info!("✓ Redis Cluster subscribed to channel {}", channel);

        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload::<String>().map_err(redis_error));
        Ok(stream.boxed())
    }
}

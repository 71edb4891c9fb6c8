//! Backing store (L2) abstraction and its implementations.
//!
//! Every variant exposes the same six verbs plus subscribe: get, set with
//! TTL, delete, exists, TTL query and publish. The facade never knows which
//! variant it is talking to.

use crate::error::Result;
use futures::stream::BoxStream;
use std::future::Future;
use std::time::Duration;

#[cfg(feature = "redis")]
pub mod cluster;
#[cfg(feature = "inmemory")]
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "redis")]
pub use cluster::RedisClusterBackend;
#[cfg(feature = "inmemory")]
pub use memory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use redis::RedisBackend;

/// Payloads received on a subscribed channel.
///
/// An `Err` item is a single unreadable message; the end of the stream means
/// the underlying connection is gone and the caller should resubscribe.
pub type Subscription = BoxStream<'static, Result<String>>;

/// Shared key-value store with TTL and pub/sub primitives.
///
/// Implementations must never store an unbounded entry: a zero TTL means the
/// implementation's ceiling, anything else is rounded up to whole seconds.
pub trait BackingStore: Send + Sync + 'static {
    /// Fetch the stored text for `key`, `None` if absent.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Store `value` under `key` for `ttl`, or for the ceiling when `ttl` is zero.
    fn set(&self, key: &str, value: &str, ttl: Duration)
        -> impl Future<Output = Result<()>> + Send;

    /// Remove `key`. Returns whether it existed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Remaining lifetime of `key`; `None` if the key is missing or has no expiry.
    fn ttl_remaining(&self, key: &str) -> impl Future<Output = Result<Option<Duration>>> + Send;

    fn publish(&self, channel: &str, payload: &str) -> impl Future<Output = Result<()>> + Send;

    /// Open one subscription on `channel` over a dedicated connection.
    fn subscribe(&self, channel: &str) -> impl Future<Output = Result<Subscription>> + Send;
}

/// Whole seconds the store keeps an entry for; zero falls back to `ceiling`.
pub(crate) fn ttl_secs(ttl: Duration, ceiling: Duration) -> u64 {
    let ttl = if ttl.is_zero() { ceiling } else { ttl };
    (ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)).max(1)
}

/// Either Redis variant, chosen by [`CacheOptions::cluster_mode`](crate::CacheOptions).
#[cfg(feature = "redis")]
#[derive(Clone)]
pub enum RedisStore {
    Single(RedisBackend),
    Cluster(RedisClusterBackend),
}

#[cfg(feature = "redis")]
impl RedisStore {
    /// Connect the variant selected by `options.cluster_mode`.
    ///
    /// # Errors
    /// Returns `Err` if the options are invalid or the initial connection fails.
    pub async fn connect(options: &crate::CacheOptions) -> Result<Self> {
        if options.cluster_mode {
            RedisClusterBackend::new(options).await.map(RedisStore::Cluster)
        } else {
            RedisBackend::new(options).map(RedisStore::Single)
        }
    }
}

#[cfg(feature = "redis")]
impl BackingStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self {
            RedisStore::Single(backend) => backend.get(key).await,
            RedisStore::Cluster(backend) => backend.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        match self {
            RedisStore::Single(backend) => backend.set(key, value, ttl).await,
            RedisStore::Cluster(backend) => backend.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match self {
            RedisStore::Single(backend) => backend.delete(key).await,
            RedisStore::Cluster(backend) => backend.delete(key).await,
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self {
            RedisStore::Single(backend) => backend.exists(key).await,
            RedisStore::Cluster(backend) => backend.exists(key).await,
        }
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        match self {
            RedisStore::Single(backend) => backend.ttl_remaining(key).await,
            RedisStore::Cluster(backend) => backend.ttl_remaining(key).await,
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        match self {
            RedisStore::Single(backend) => backend.publish(channel, payload).await,
            RedisStore::Cluster(backend) => backend.publish(channel, payload).await,
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        match self {
            RedisStore::Single(backend) => backend.subscribe(channel).await,
            RedisStore::Cluster(backend) => backend.subscribe(channel).await,
        }
    }
}

/// Map a Redis `TTL` reply to a lifetime: -2 (missing) and -1 (no expiry) are `None`.
#[cfg(feature = "redis")]
pub(crate) fn ttl_from_reply(seconds: i64) -> Option<Duration> {
    u64::try_from(seconds).ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_secs_rounds_up_and_never_zero() {
        let ceiling = Duration::from_secs(3600);
        assert_eq!(ttl_secs(Duration::from_secs(100), ceiling), 100);
        assert_eq!(ttl_secs(Duration::from_millis(100), ceiling), 1);
        assert_eq!(ttl_secs(Duration::from_millis(1500), ceiling), 2);
        assert_eq!(ttl_secs(Duration::ZERO, ceiling), 3600);
        assert_eq!(ttl_secs(Duration::ZERO, Duration::ZERO), 1);
    }

    #[cfg(feature = "redis")]
    #[test]
    fn test_ttl_from_reply() {
        assert_eq!(ttl_from_reply(42), Some(Duration::from_secs(42)));
        assert_eq!(ttl_from_reply(0), Some(Duration::ZERO));
        assert_eq!(ttl_from_reply(-1), None);
        assert_eq!(ttl_from_reply(-2), None);
    }
}

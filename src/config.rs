//! Construction-time configuration.

use crate::error::{Error, Result};
use std::time::Duration;

/// Default (and maximum) lifetime of any cached item: one hour.
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(60 * 60);

/// Default name of the invalidation channel shared by cooperating instances.
pub const DEFAULT_SYNC_CHANNEL: &str = "sync";

/// How much earlier a read-backfilled L1 entry expires than its L2 original.
pub const DEFAULT_BACKFILL_SKEW: Duration = Duration::from_secs(5);

/// Fixed wait between sync subscription attempts.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Default backing store connection pool size.
/// Override with DCACHE_POOL_SIZE environment variable
const DEFAULT_POOL_SIZE: usize = 10;

/// Configuration for a [`DistributedCache`](crate::DistributedCache).
#[derive(Clone, Debug)]
pub struct CacheOptions {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Logical database index selected on every new single-node connection.
    pub db: i64,
    pub pool_size: usize,
    pub cluster_mode: bool,
    pub channel: String,
    /// Single TTL ceiling applied on every write path, local and remote.
    pub max_ttl: Duration,
    pub backfill_skew: Duration,
    pub reconnect_backoff: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            pool_size: DEFAULT_POOL_SIZE,
            cluster_mode: false,
            channel: DEFAULT_SYNC_CHANNEL.to_string(),
            max_ttl: DEFAULT_MAX_TTL,
            backfill_skew: DEFAULT_BACKFILL_SKEW,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }
}

impl CacheOptions {
    /// Defaults overridden by `DCACHE_HOST`, `DCACHE_PORT`, `DCACHE_PASSWORD`,
    /// `DCACHE_DB`, `DCACHE_POOL_SIZE` and `DCACHE_CLUSTER`.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn from_env() -> Self {
        let mut options = CacheOptions::default();

        if let Ok(host) = std::env::var("DCACHE_HOST") {
            options.host = host;
        }
        if let Ok(password) = std::env::var("DCACHE_PASSWORD") {
            if !password.is_empty() {
                options.password = Some(password);
            }
        }
        if let Some(port) = parse_env("DCACHE_PORT") {
            options.port = port;
        }
        if let Some(db) = parse_env("DCACHE_DB") {
            options.db = db;
        }
        if let Some(pool_size) = parse_env("DCACHE_POOL_SIZE") {
            options.pool_size = pool_size;
        }
        if let Some(cluster_mode) = parse_env("DCACHE_CLUSTER") {
            options.cluster_mode = cluster_mode;
        }

        options
    }

    /// Reject configurations the cache cannot run with.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::ConfigError("host must not be empty".to_string()));
        }
        if self.pool_size == 0 {
            return Err(Error::ConfigError("pool_size must be at least 1".to_string()));
        }
        if self.max_ttl.as_secs() == 0 {
            return Err(Error::ConfigError(
                "max_ttl must be at least one second".to_string(),
            ));
        }
        if self.channel.is_empty() {
            return Err(Error::ConfigError("sync channel must not be empty".to_string()));
        }
        if self.db < 0 {
            return Err(Error::ConfigError(format!("invalid database index {}", self.db)));
        }
        Ok(())
    }

    /// Resolve a caller-supplied TTL against the ceiling.
    ///
    /// `None` and zero mean "use the ceiling"; fractional seconds round up since
    /// the backing store only keeps whole seconds.
    pub fn effective_ttl(&self, ttl: Option<Duration>) -> Duration {
        match ttl {
            Some(ttl) if !ttl.is_zero() => {
                let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
                Duration::from_secs(secs).min(self.max_ttl)
            }
            _ => self.max_ttl,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparsable {}={:?}", name, raw);
            None
        }
    }
}

//! Two-tier cache facade: L1 in process, L2 in the backing store, kept loosely
//! coherent across instances by the sync channel.

use crate::backend::BackingStore;
use crate::config::CacheOptions;
use crate::error::{Error, Result};
use crate::local::LocalCache;
use crate::serialization::{decode, encode, JsonSerialize, SharedSerializer, TextSerialize};
use crate::sync::{generate_instance_id, SyncListener, SyncPublisher};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Read-through/write-through cache over a [`BackingStore`].
///
/// Cloning is cheap and every clone shares the same tiers, identity and sync
/// listener. The listener is stopped by [`shutdown`](DistributedCache::shutdown)
/// or when the last clone is dropped.
///
/// Failures never escape as errors: each operation logs a warning and
/// reports `false` / `None`.
///
/// # Example
///
/// ```
/// use dcache::{backend::InMemoryBackend, CacheOptions, DistributedCache};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> dcache::error::Result<()> {
/// let cache = DistributedCache::new(InMemoryBackend::new(), CacheOptions::default())?;
///
/// assert!(cache.set("greeting", "hello", Some(Duration::from_secs(100))).await);
/// let value: Option<String> = cache.get("greeting").await;
/// assert_eq!(value.as_deref(), Some("hello"));
/// # Ok(())
/// # }
/// ```
pub struct DistributedCache<B: BackingStore> {
    inner: Arc<Inner<B>>,
}

impl<B: BackingStore> Clone for DistributedCache<B> {
    fn clone(&self) -> Self {
        DistributedCache {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<B: BackingStore> {
    store: Arc<B>,
    local: Arc<LocalCache>,
    codec: SharedSerializer,
    publisher: SyncPublisher<B>,
    instance_id: Arc<str>,
    options: CacheOptions,
    shutdown_tx: watch::Sender<bool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<B: BackingStore> Drop for Inner<B> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(feature = "redis")]
impl DistributedCache<crate::backend::RedisStore> {
    /// Connect to Redis (single node or cluster per `options.cluster_mode`)
    /// and start the sync listener.
    ///
    /// # Errors
    /// Returns `Err` if the options are invalid or the backend cannot be built
    pub async fn connect(options: CacheOptions) -> Result<Self> {
        let store = crate::backend::RedisStore::connect(&options).await?;
        Self::new(store, options)
    }
}

impl<B: BackingStore> DistributedCache<B> {
    /// Build a cache over `store` with the default JSON codec.
    ///
    /// Spawns the sync listener, so this must run inside a Tokio runtime.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` on invalid options or outside a runtime
    pub fn new(store: B, options: CacheOptions) -> Result<Self> {
        Self::with_serializer(store, options, JsonSerialize)
    }

    /// Build a cache over `store` using `codec` for values and sync messages.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` on invalid options or outside a runtime
    pub fn with_serializer(
        store: B,
        options: CacheOptions,
        codec: impl TextSerialize + 'static,
    ) -> Result<Self> {
        options.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::ConfigError(format!("DistributedCache needs a Tokio runtime: {}", e))
        })?;

        let store = Arc::new(store);
        let local = Arc::new(LocalCache::new(options.max_ttl));
        let codec = SharedSerializer::new(Arc::new(codec));
        let instance_id: Arc<str> = Arc::from(generate_instance_id());
        let channel: Arc<str> = Arc::from(options.channel.as_str());

        let publisher = SyncPublisher::new(
            Arc::clone(&store),
            codec.clone(),
            Arc::clone(&instance_id),
            Arc::clone(&channel),
        );
        let listener = SyncListener::new(
            Arc::clone(&store),
            Arc::clone(&local),
            codec.clone(),
            Arc::clone(&instance_id),
            channel,
            options.reconnect_backoff,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(listener.run(shutdown_rx));

        info!(
            "✓ DistributedCache {} ready (sync channel: {})",
            instance_id, options.channel
        );

        Ok(DistributedCache {
            inner: Arc::new(Inner {
                store,
                local,
                codec,
                publisher,
                instance_id,
                options,
                shutdown_tx,
                listener: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Authoritative existence check against the backing store.
    pub async fn check(&self, key: &str) -> bool {
        match self.inner.store.exists(key).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("✗ CHECK {} failed: {}", key, e);
                false
            }
        }
    }

    /// True iff the local tier holds a live entry for `key`. No network.
    pub async fn check_mem(&self, key: &str) -> bool {
        self.inner.local.check(key).await
    }

    /// Read `key`, local tier first, then the backing store.
    ///
    /// A store hit is copied into the local tier for its remaining lifetime
    /// minus the backfill skew, so the local copy always expires first. When
    /// the remaining lifetime is unknown the value is returned but not cached.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let codec = self.inner.codec.current();

        if let Some(text) = self.inner.local.get(key).await {
            debug!("✓ L1 GET {} -> HIT", key);
            return match decode(codec.as_ref(), &text) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("✗ GET {} failed: {}", key, e);
                    None
                }
            };
        }

        match self.load(key, codec.as_ref()).await {
            Ok(value) => value,
            Err(e) => {
                warn!("✗ GET {} failed: {}", key, e);
                None
            }
        }
    }

    /// Write `value` through to the backing store, then seed the local tier
    /// and broadcast the change.
    ///
    /// `ttl` of `None` or zero means the configured ceiling; longer TTLs are
    /// clamped to it. Returns `false` without touching the local tier if
    /// marshalling or the store write fails.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        match self.try_set(key, value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!("✗ SET {} failed: {}", key, e);
                false
            }
        }
    }

    /// Remove `key` from both tiers and broadcast the removal.
    ///
    /// The local entry is dropped and the broadcast sent even if the store
    /// call fails; only that failure makes this return `false`. Deleting a
    /// missing key succeeds.
    pub async fn delete(&self, key: &str) -> bool {
        let result = self.inner.store.delete(key).await;

        self.inner.local.delete(key).await;
        self.inner.publisher.publish_delete(key);

        match result {
            Ok(existed) => {
                debug!("✓ DELETE {} (existed: {})", key, existed);
                true
            }
            Err(e) => {
                warn!("✗ DELETE {} failed: {}", key, e);
                false
            }
        }
    }

    /// Swap the codec used for values and sync messages.
    ///
    /// Meant for configuration time: values already stored with the old codec
    /// will fail to decode with the new one.
    pub fn set_text_serialize(&self, codec: impl TextSerialize + 'static) {
        self.inner.codec.replace(Arc::new(codec));
        info!("DistributedCache {} codec replaced", self.inner.instance_id);
    }

    /// Random identity stamped on every broadcast from this instance.
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    /// Stop the sync listener and wait for it to finish.
    ///
    /// The cache keeps serving reads and writes afterwards, but no longer
    /// applies changes made by other instances.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);

        let handle = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Sync listener ended abnormally: {}", e);
            }
        }
    }

    async fn load<T: DeserializeOwned>(
        &self,
        key: &str,
        codec: &dyn TextSerialize,
    ) -> Result<Option<T>> {
        let Some(text) = self.inner.store.get(key).await? else {
            debug!("✗ GET {} -> MISS", key);
            return Ok(None);
        };

        // Undecodable values are not cached
        let value = decode(codec, &text)?;

        match self.inner.store.ttl_remaining(key).await {
            Ok(Some(remaining)) => {
                let local_ttl = remaining.saturating_sub(self.inner.options.backfill_skew);
                debug!(
                    "Backfill {} into L1 (store TTL {:?}, local TTL {:?})",
                    key, remaining, local_ttl
                );
                self.inner.local.set(key, text, local_ttl).await;
            }
            Ok(None) => debug!("No TTL for {}, skipping L1 backfill", key),
            Err(e) => warn!("TTL lookup for {} failed, skipping L1 backfill: {}", key, e),
        }

        Ok(Some(value))
    }

    async fn try_set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let codec = self.inner.codec.current();
        let text = encode(codec.as_ref(), value)?;
        let ttl = self.inner.options.effective_ttl(ttl);

        self.inner.store.set(key, &text, ttl).await?;

        self.inner.local.set(key, text.clone(), ttl).await;
        self.inner.publisher.publish_set(key, text, ttl);
        debug!("✓ SET {} (TTL: {:?})", key, ttl);
        Ok(())
    }
}

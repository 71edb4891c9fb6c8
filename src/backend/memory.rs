//! In-process backing store.
//!
//! Behaves like a tiny Redis: TTL'd string values, lazy expiry, and channel
//! pub/sub over a `tokio::sync::broadcast`. Clones share state, so two caches
//! built over clones of one `InMemoryBackend` act like two processes sharing
//! one server.

use super::{ttl_secs, BackingStore, Subscription};
use crate::config::DEFAULT_MAX_TTL;
use crate::error::{Error, Result};
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Capacity of the pub/sub buffer; slow subscribers skip what they miss.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

type Published = (String, String);

/// In-memory [`BackingStore`] with TTL and pub/sub support.
#[derive(Clone)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, StoredValue>>,
    bus: Arc<Mutex<broadcast::Sender<Published>>>,
    offline: Arc<AtomicBool>,
    max_ttl: Duration,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::with_max_ttl(DEFAULT_MAX_TTL)
    }

    /// Backend whose zero-TTL writes live for `max_ttl`.
    pub fn with_max_ttl(max_ttl: Duration) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        InMemoryBackend {
            store: Arc::new(DashMap::new()),
            bus: Arc::new(Mutex::new(tx)),
            offline: Arc::new(AtomicBool::new(false)),
            max_ttl,
        }
    }

    /// Simulate an outage: while offline every call fails with `ConnectionError`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// End every open subscription, as a dropped server connection would.
    pub fn close_subscriptions(&self) {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        *self.bus.lock().unwrap_or_else(PoisonError::into_inner) = tx;
        debug!("✓ InMemory subscriptions closed");
    }

    /// Number of open subscriptions across all channels.
    pub fn subscriber_count(&self) -> usize {
        self.sender().receiver_count()
    }

    /// Number of stored keys, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn sender(&self) -> broadcast::Sender<Published> {
        self.bus.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::ConnectionError(
                "in-memory backend is offline".to_string(),
            ));
        }
        Ok(())
    }

    /// Live entry for `key`; an expired one is removed on the way.
    fn live(&self, key: &str) -> Option<StoredValue> {
        let now = Instant::now();
        if let Some(entry) = self.store.get(key) {
            if now < entry.expires_at {
                return Some(entry.clone());
            }
        }
        self.store.remove_if(key, |_, entry| now >= entry.expires_at);
        None
    }
}

impl BackingStore for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_online()?;
        let value = self.live(key).map(|entry| entry.value);
        debug!(
            "✓ InMemory GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.ensure_online()?;
        let secs = ttl_secs(ttl, self.max_ttl);
        self.store.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(secs),
            },
        );
        debug!("✓ InMemory SET {} (TTL: {}s)", key, secs);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_online()?;
        let existed = self.live(key).is_some();
        self.store.remove(key);
        debug!("✓ InMemory DELETE {}", key);
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_online()?;
        Ok(self.live(key).is_some())
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        self.ensure_online()?;
        Ok(self
            .live(key)
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now())))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.ensure_online()?;
        // No receivers is not an error: nobody else is listening yet
        let delivered = self
            .sender()
            .send((channel.to_string(), payload.to_string()))
            .unwrap_or(0);
        debug!("✓ InMemory PUBLISH {} -> {} receiver(s)", channel, delivered);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        self.ensure_online()?;
        let rx = self.sender().subscribe();
        let channel = channel.to_string();

        let stream = futures::stream::unfold(rx, move |mut rx| {
            let channel = channel.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok((published_on, payload)) if published_on == channel => {
                            return Some((Ok(payload), rx));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("InMemory subscriber lagged, {} message(s) lost", skipped);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = InMemoryBackend::new();

        backend
            .set("k", "v", Duration::from_secs(10))
            .await
            .expect("Failed to set");
        assert_eq!(
            backend.get("k").await.expect("Failed to get").as_deref(),
            Some("v")
        );
        assert!(backend.exists("k").await.expect("Failed to check"));

        assert!(backend.delete("k").await.expect("Failed to delete"));
        assert!(!backend.delete("k").await.expect("Failed to delete"));
        assert!(backend.get("k").await.expect("Failed to get").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_and_ttl_remaining() {
        let backend = InMemoryBackend::new();
        backend
            .set("k", "v", Duration::from_secs(100))
            .await
            .expect("Failed to set");

        tokio::time::advance(Duration::from_secs(40)).await;
        let remaining = backend
            .ttl_remaining("k")
            .await
            .expect("Failed to query TTL")
            .expect("Key has no TTL");
        assert_eq!(remaining, Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(backend.get("k").await.expect("Failed to get").is_none());
        assert!(backend
            .ttl_remaining("k")
            .await
            .expect("Failed to query TTL")
            .is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_uses_ceiling() {
        let backend = InMemoryBackend::new();
        backend
            .set("k", "v", Duration::ZERO)
            .await
            .expect("Failed to set");
        assert_eq!(
            backend.ttl_remaining("k").await.expect("Failed to query TTL"),
            Some(DEFAULT_MAX_TTL)
        );

        let backend = InMemoryBackend::with_max_ttl(Duration::from_secs(30));
        backend
            .set("k", "v", Duration::ZERO)
            .await
            .expect("Failed to set");
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!backend.exists("k").await.expect("Failed to check"));
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let backend = InMemoryBackend::new();
        backend.set_offline(true);

        assert!(matches!(
            backend.get("k").await,
            Err(Error::ConnectionError(_))
        ));
        assert!(backend.set("k", "v", Duration::from_secs(1)).await.is_err());
        assert!(backend.exists("k").await.is_err());
        assert!(backend.publish("sync", "x").await.is_err());
        assert!(backend.subscribe("sync").await.is_err());

        backend.set_offline(false);
        assert!(backend.get("k").await.is_ok());
    }

    #[tokio::test]
    async fn test_pubsub_filters_by_channel() {
        let backend = InMemoryBackend::new();
        let mut sub = backend
            .subscribe("sync")
            .await
            .expect("Failed to subscribe");
        assert_eq!(backend.subscriber_count(), 1);

        backend.publish("other", "nope").await.expect("Failed to publish");
        backend.publish("sync", "hello").await.expect("Failed to publish");

        let received = sub
            .next()
            .await
            .expect("Stream ended")
            .expect("Bad payload");
        assert_eq!(received, "hello");
    }

    #[tokio::test]
    async fn test_close_subscriptions_ends_stream() {
        let backend = InMemoryBackend::new();
        let mut sub = backend
            .subscribe("sync")
            .await
            .expect("Failed to subscribe");

        backend.close_subscriptions();
        assert!(sub.next().await.is_none());
        assert_eq!(backend.subscriber_count(), 0);
    }
}

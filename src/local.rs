//! Process-local TTL cache (L1).
//!
//! A plain map behind one reader/writer lock. There is no background sweep:
//! an expired entry is evicted by the access that discovers it, so entries
//! that are never read again stay in memory until overwritten.

use crate::config::DEFAULT_MAX_TTL;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Clone, Debug)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory L1 tier holding serialized values with an absolute expiry.
///
/// # Example
///
/// ```
/// # use dcache::LocalCache;
/// # use std::time::Duration;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = LocalCache::new(Duration::from_secs(3600));
/// cache.set("user:1", r#"{"name":"a"}"#, Duration::from_secs(60)).await;
/// assert_eq!(cache.get("user:1").await.as_deref(), Some(r#"{"name":"a"}"#));
/// # }
/// ```
#[derive(Debug)]
pub struct LocalCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_ttl: Duration,
}

impl Default for LocalCache {
    fn default() -> Self {
        LocalCache::new(DEFAULT_MAX_TTL)
    }
}

impl LocalCache {
    /// Create an empty cache whose entries never outlive `max_ttl`.
    pub fn new(max_ttl: Duration) -> Self {
        LocalCache {
            entries: RwLock::new(HashMap::new()),
            max_ttl,
        }
    }

    /// Live value for `key`, evicting it if it has expired.
    pub async fn get(&self, key: &str) -> Option<String> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if entry.is_live(Instant::now()) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        self.evict_if_expired(key).await;
        None
    }

    /// Insert or replace `key`, clamping `ttl` to the ceiling.
    ///
    /// A zero TTL cannot produce a live entry: any existing entry is dropped
    /// and nothing is inserted. Returns whether an entry was inserted.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> bool {
        let key = key.into();
        let ttl = ttl.min(self.max_ttl);
        let mut entries = self.entries.write().await;

        if ttl.is_zero() {
            entries.remove(&key);
            return false;
        }

        let entry = CacheEntry {
            value: value.into(),
            expires_at: Instant::now() + ttl,
        };
        entries.insert(key, entry);
        true
    }

    /// Remove `key`. Returns whether it was present (live or not).
    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.entries.write().await.remove(key).is_some();
        if removed {
            debug!("✓ L1 DELETE {}", key);
        }
        removed
    }

    /// Existence probe with the same lazy eviction as [`get`](LocalCache::get).
    pub async fn check(&self, key: &str) -> bool {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return false,
                Some(entry) if entry.is_live(Instant::now()) => return true,
                Some(_) => {}
            }
        }

        self.evict_if_expired(key).await;
        false
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    // Re-checked under the write lock: a writer may have refreshed the entry
    // between releasing the read lock and getting here.
    async fn evict_if_expired(&self, key: &str) {
        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| !entry.is_live(Instant::now()))
        {
            entries.remove(key);
            debug!("L1 entry {} expired, evicted", key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = LocalCache::default();

        assert!(cache.get("missing").await.is_none());
        assert!(cache.set("k", "v", Duration::from_secs(10)).await);
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert!(cache.check("k").await);

        assert!(cache.delete("k").await);
        assert!(cache.get("k").await.is_none());
        assert!(!cache.delete("k").await);
    }

    #[tokio::test]
    async fn test_set_overwrites_wholesale() {
        let cache = LocalCache::default();

        cache.set("k", "old", Duration::from_secs(10)).await;
        cache.set("k", "new", Duration::from_secs(20)).await;

        assert_eq!(cache.get("k").await.as_deref(), Some("new"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_expiry_on_get() {
        let cache = LocalCache::default();
        cache.set("k", "v", Duration::from_secs(5)).await;

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.get("k").await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_expiry_on_check() {
        let cache = LocalCache::default();
        cache.set("k", "v", Duration::from_secs(5)).await;

        tokio::time::advance(Duration::from_secs(6)).await;
        // Still stored until something looks at it
        assert_eq!(cache.len().await, 1);
        assert!(!cache.check("k").await);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_clamped_to_ceiling() {
        let cache = LocalCache::new(Duration::from_secs(60));
        cache.set("k", "v", Duration::from_secs(10_000)).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.check("k").await);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!cache.check("k").await);
    }

    #[tokio::test]
    async fn test_zero_ttl_drops_existing_entry() {
        let cache = LocalCache::default();
        cache.set("k", "v", Duration::from_secs(10)).await;

        assert!(!cache.set("k", "v2", Duration::ZERO).await);
        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_access_same_key() {
        let cache = Arc::new(LocalCache::default());
        let mut handles = Vec::new();

        for worker in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for round in 0..200 {
                    let value = format!("{}-{}", worker, round);
                    match round % 3 {
                        0 => {
                            cache.set("shared", value, Duration::from_secs(30)).await;
                        }
                        1 => {
                            if let Some(seen) = cache.get("shared").await {
                                // Whatever we see must be a complete value some writer stored
                                let (w, r) = seen.split_once('-').expect("Torn value");
                                assert!(w.parse::<u32>().is_ok());
                                assert!(r.parse::<u32>().is_ok());
                            }
                        }
                        _ => {
                            cache.delete("shared").await;
                        }
                    }
                }
            }));
        }

        for handle in handles {
            handle.await.expect("Worker panicked");
        }
        assert!(cache.len().await <= 1);
    }

    proptest! {
        #[test]
        fn prop_entries_never_outlive_ceiling(ttl_secs in 1u64..100_000, ceiling in 1u64..7200) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .expect("Failed to build runtime");

            rt.block_on(async {
                let cache = LocalCache::new(Duration::from_secs(ceiling));
                prop_assert!(cache.set("k", "v", Duration::from_secs(ttl_secs)).await);

                let lifetime = ttl_secs.min(ceiling);
                tokio::time::advance(Duration::from_secs(lifetime) - Duration::from_millis(1)).await;
                prop_assert!(cache.check("k").await);

                tokio::time::advance(Duration::from_millis(1)).await;
                prop_assert!(!cache.check("k").await);
                Ok(())
            })?;
        }
    }
}

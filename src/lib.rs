//! # dcache
//!
//! A two-tier read-through/write-through cache client with pub/sub cache coherence.
//!
//! ## Features
//!
//! - **Two tiers:** process-local TTL map (L1) in front of a shared key-value store (L2)
//! - **Cross-instance coherence:** Set/Delete events broadcast over the store's pub/sub channel
//! - **Self-echo suppression:** each instance ignores the events it published itself
//! - **Bounded staleness:** one TTL ceiling everywhere, read-backfilled entries expire early
//! - **Backend Agnostic:** single-node Redis, Redis Cluster, in-memory, or custom backends
//! - **Pluggable codec:** swap the text serializer at runtime
//!
//! ## Quick Start
//!
//! ```ignore
//! use dcache::{CacheOptions, DistributedCache};
//! use std::time::Duration;
//!
//! let cache = DistributedCache::connect(CacheOptions {
//!     host: "127.0.0.1".to_string(),
//!     port: 6379,
//!     db: 1,
//!     ..Default::default()
//! })
//! .await?;
//!
//! cache.set("user:1", &user, Some(Duration::from_secs(100))).await;
//! let user: Option<User> = cache.get("user:1").await;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod local;
pub mod serialization;
pub mod sync;

// Re-exports for convenience
pub use backend::BackingStore;
pub use cache::DistributedCache;
pub use config::CacheOptions;
pub use error::{Error, Result};
pub use local::LocalCache;
pub use serialization::{JsonSerialize, TextSerialize};
pub use sync::{SyncAction, SyncMessage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

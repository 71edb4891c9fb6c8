//! Basic usage example: one cache instance against a local Redis.
//!
//! Run two copies side by side to watch a write on one show up in the
//! other's local tier.

use dcache::{error::Result, CacheOptions, DistributedCache};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .init();

    let options = CacheOptions {
        db: 1,
        ..CacheOptions::from_env()
    };
    let cache = DistributedCache::connect(options).await?;
    println!("instance {}", cache.instance_id());

    let before: Option<String> = cache.get("aaaa").await;
    println!("before set: {:?}", before);

    cache
        .set("aaaa", "ccccc", Some(Duration::from_secs(100)))
        .await;

    if let Some(value) = cache.get::<String>("aaaa").await {
        println!("after set: {}", value);
    }

    println!("in local tier: {}", cache.check_mem("aaaa").await);

    tokio::signal::ctrl_c().await.ok();
    cache.shutdown().await;
    Ok(())
}

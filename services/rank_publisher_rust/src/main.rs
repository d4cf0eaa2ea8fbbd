//! Ranking feed publisher service.
//!
//! Same shape as the price publisher: one declarative feed config, one
//! capped stream. The ranking feed is the main feed downstream, so its row
//! order defines the merged output's order.

use anyhow::{Context, Result};
use dotenv::dotenv;
use feedmerge_core::config::{load_redis_url, FeedConfig};
use feedmerge_core::fetcher::DataFetcher;
use feedmerge_core::publisher::Publisher;
use feedmerge_core::redis::{AppendLog, RedisStore};
use log::info;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    info!("Starting rank_publisher_rust...");

    let config_path =
        env::var("FEED_CONFIG").unwrap_or_else(|_| "config/rank_feed.json".to_string());
    let config = FeedConfig::load(&config_path)
        .with_context(|| format!("loading feed config {config_path}"))?;

    let store = RedisStore::connect(&load_redis_url()).await?;
    let log = AppendLog::new(store, config.stream.clone());
    let fetcher = DataFetcher::new(config.clone())?;
    let publisher = Publisher::new(&config, Arc::new(fetcher), log)?;

    publisher.run().await?;
    Ok(())
}

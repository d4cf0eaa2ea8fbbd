//! Merge service: reconciles the latest snapshot of every feed into one
//! ranked dataset in the Redis cache, once per interval.

use anyhow::Result;
use dotenv::dotenv;
use feedmerge_core::config::SyncConfig;
use feedmerge_core::redis::RedisStore;
use feedmerge_core::sync::Synchronizer;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    info!("Starting merge_service_rust...");

    let config = SyncConfig::from_env()?;
    let store = RedisStore::connect(&config.redis_url).await?;
    let synchronizer = Synchronizer::new(config, store)?;

    synchronizer.run().await?;
    Ok(())
}

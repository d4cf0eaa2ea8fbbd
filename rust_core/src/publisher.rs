//! Snapshot publisher: binds one snapshot source to one feed's append log.

use crate::config::FeedConfig;
use crate::error::{FeedError, Result};
use crate::fetcher::SnapshotSource;
use crate::redis::AppendLog;
use crate::timeutil::{floor_to_minute, unix_to_iso, until_next_minute};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::{error, info};

/// Publishes one feed: fetch once per trigger, overwrite the log slot.
pub struct Publisher {
    source: Arc<dyn SnapshotSource>,
    log: AppendLog,
    interval_secs: u64,
}

impl Publisher {
    /// Build a publisher from its dependencies; an unusable feed config
    /// fails fast here rather than on the first trigger.
    pub fn new(
        config: &FeedConfig,
        source: Arc<dyn SnapshotSource>,
        log: AppendLog,
    ) -> Result<Self> {
        if config.stream != log.stream() {
            return Err(FeedError::Config(format!(
                "feed config targets stream '{}' but log handle is '{}'",
                config.stream,
                log.stream()
            )));
        }
        if config.interval_secs == 0 {
            return Err(FeedError::Config("publish interval must be non-zero".into()));
        }
        Ok(Self {
            source,
            log,
            interval_secs: config.interval_secs,
        })
    }

    /// One trigger: fetch exactly once, serialize, overwrite the minute slot.
    pub async fn publish_once(&self) -> Result<()> {
        let snapshot = self.source.fetch().await?;
        let payload = serde_json::to_string(&snapshot)?;

        let ts = Utc::now().timestamp();
        self.log.append(ts, &payload).await?;

        info!(
            "[{}] : {}: {}",
            self.log.stream(),
            unix_to_iso(floor_to_minute(ts)),
            payload.chars().take(100).collect::<String>()
        );
        Ok(())
    }

    /// Minute-aligned publish loop.
    ///
    /// Sleeps to the next wall-clock minute boundary so independent feeds
    /// sample near-simultaneously, publishes once (a failure here is a
    /// startup error and propagates), then ticks at the configured
    /// interval. Later iterations are supervised: a failed fetch or write
    /// is logged and does not kill future triggers.
    pub async fn run(&self) -> Result<()> {
        let wait = until_next_minute();
        info!(
            "Synchronizing to rounded minute. Sending data in {:.1} seconds.",
            wait.as_secs_f64()
        );
        tokio::time::sleep(wait).await;
        self.publish_once().await?;

        let period = Duration::from_secs(self.interval_secs);
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            if let Err(e) = self.publish_once().await {
                error!("[{}] publish failed: {e}", self.log.stream());
            }
        }
    }
}

//! Synchronizer: the long-running reconciliation loop.
//!
//! Each cycle fans out a read of every feed's latest log entry, applies the
//! missing-data and clock-skew policy, merges when every feed is fresh and
//! writes the ranked result to the cache. Per-feed failures degrade only the
//! current cycle; the loop itself runs until process termination.

use crate::config::SyncConfig;
use crate::error::{FeedError, Result};
use crate::merge::merge_snapshots;
use crate::redis::{AppendLog, RedisStore};
use crate::timeutil::{floor_to_minute, unix_to_iso};
use crate::Snapshot;
use futures_util::future::join_all;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of one polling cycle, decided before any merge work happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// At least one feed had no usable entry; no partial merges.
    MissingData,
    /// Feeds are transiently desynchronized beyond one interval.
    SkewTooLarge { skew: i64 },
    /// All feeds fresh: merge in `order` (main first), write at `cache_key`.
    MergeReady { order: Vec<usize>, cache_key: i64 },
}

/// Unpacked view of one feed's latest log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub timestamp: i64,
    pub payload: String,
}

impl FeedEntry {
    pub fn missing() -> Self {
        Self {
            timestamp: 0,
            payload: String::new(),
        }
    }

    pub fn is_missing(&self) -> bool {
        self.timestamp == 0 || self.payload.is_empty()
    }
}

/// Parse an `"<secs>-<seq>"` entry id and its payload.
fn parse_entry(id: &str, payload: String) -> Result<FeedEntry> {
    let timestamp = id
        .split('-')
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| FeedError::Decode(format!("bad entry id '{id}'")))?;
    Ok(FeedEntry { timestamp, payload })
}

/// Unpack a raw `(entry_id, payload)` stream read.
///
/// A malformed or absent entry degrades to `(0, empty)`; the caller treats
/// that as a missing feed for this cycle.
pub fn unpack_entry(raw: Option<(String, String)>) -> FeedEntry {
    let Some((id, payload)) = raw else {
        debug!("Empty or inaccessible entry");
        return FeedEntry::missing();
    };
    match parse_entry(&id, payload) {
        Ok(entry) => entry,
        Err(e) => {
            error!("Error unpacking entry, check entry format: {e}");
            FeedEntry::missing()
        }
    }
}

/// Pure per-cycle policy decision over the unpacked feed entries.
pub fn decide_cycle(entries: &[FeedEntry], main_index: usize, interval_secs: u64) -> CycleOutcome {
    if entries.iter().any(FeedEntry::is_missing) {
        return CycleOutcome::MissingData;
    }

    let timestamps: Vec<i64> = entries.iter().map(|e| e.timestamp).collect();
    let newest = *timestamps.iter().max().unwrap_or(&0);
    let oldest = *timestamps.iter().min().unwrap_or(&0);
    let skew = newest - oldest;
    if skew > interval_secs as i64 {
        return CycleOutcome::SkewTooLarge { skew };
    }

    // Main feed first: its key order and symbol universe define the output.
    let mut order: Vec<usize> = Vec::with_capacity(entries.len());
    order.push(main_index);
    order.extend((0..entries.len()).filter(|&i| i != main_index));

    CycleOutcome::MergeReady {
        order,
        cache_key: floor_to_minute(newest),
    }
}

/// The reconciliation loop over all configured feeds.
pub struct Synchronizer {
    config: SyncConfig,
    store: RedisStore,
    logs: Vec<AppendLog>,
    main_index: usize,
}

impl Synchronizer {
    pub fn new(config: SyncConfig, store: RedisStore) -> Result<Self> {
        let logs: Vec<AppendLog> = config
            .source_streams
            .iter()
            .map(|stream| AppendLog::new(store.clone(), stream.clone()))
            .collect();
        let main_index = config
            .source_streams
            .iter()
            .position(|s| s == &config.main_stream)
            .ok_or_else(|| {
                FeedError::Config(format!(
                    "main stream '{}' is not among the source streams",
                    config.main_stream
                ))
            })?;

        Ok(Self {
            config,
            store,
            logs,
            main_index,
        })
    }

    /// Run until process termination.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Synchronizer started: sources {:?}, main '{}', interval {}s",
            self.config.source_streams, self.config.main_stream, self.config.interval_secs
        );
        loop {
            self.run_cycle().await;
            tokio::time::sleep(Duration::from_secs(self.config.interval_secs)).await;
        }
    }

    /// One POLLING -> {MISSING_DATA | SKEW_TOO_LARGE | MERGE_READY} pass.
    pub async fn run_cycle(&self) {
        // Fan-out: one concurrent read per feed, joined all-or-nothing. A
        // single feed's read failure degrades only that feed.
        let reads = join_all(self.logs.iter().map(|log| async move {
            match log.read_latest().await {
                Ok(raw) => raw,
                Err(e) => {
                    error!(
                        "Error reading the most recent entry from stream {}: {e}",
                        log.stream()
                    );
                    None
                }
            }
        }))
        .await;

        let entries: Vec<FeedEntry> = reads.into_iter().map(unpack_entry).collect();
        for (log, entry) in self.logs.iter().zip(&entries) {
            debug!(
                "[{:<8}]: {}: {}",
                log.stream(),
                unix_to_iso(entry.timestamp),
                entry.payload.chars().take(80).collect::<String>()
            );
        }

        match decide_cycle(&entries, self.main_index, self.config.interval_secs) {
            CycleOutcome::MissingData => {
                warn!("Some stream is missing data, skipping this cycle");
            }
            CycleOutcome::SkewTooLarge { skew } => {
                info!("Time difference among stream sources is too big : {skew}s");
            }
            CycleOutcome::MergeReady { order, cache_key } => {
                self.merge_and_store(&entries, &order, cache_key).await;
            }
        }
    }

    async fn merge_and_store(&self, entries: &[FeedEntry], order: &[usize], cache_key: i64) {
        let mut snapshots: Vec<Snapshot> = Vec::with_capacity(order.len());
        for &i in order {
            match serde_json::from_str::<Snapshot>(&entries[i].payload) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    // Malformed payload is a missing feed, not a crash.
                    error!(
                        "Malformed snapshot on stream {}: {e}",
                        self.logs[i].stream()
                    );
                    return;
                }
            }
        }

        let merged = merge_snapshots(&snapshots);
        let payload = match serde_json::to_string(&merged) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize merged data: {e}");
                return;
            }
        };

        info!(
            "Saving to Redis: {} ({} records)",
            cache_key,
            merged.len()
        );
        match self.store.set_cache(cache_key, &payload).await {
            Ok(()) => info!(
                "Data stored successfully with key {} data time {}",
                cache_key,
                unix_to_iso(cache_key)
            ),
            // A failed cache write costs one cycle, never the loop.
            Err(e) => error!("Error storing merged data under key {cache_key}: {e}"),
        }
    }
}

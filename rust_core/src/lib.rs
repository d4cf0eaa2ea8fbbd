//! Feedmerge Core - declarative feed extraction and cross-feed reconciliation.
//!
//! This crate provides:
//! - Declarative, paginated extraction of records from external APIs
//! - Snapshot publishing into per-feed capped Redis streams
//! - A pure merge engine joining heterogeneous feeds on `(Id, Symbol)`
//! - The synchronizer loop reconciling the latest snapshot of every feed
//!   into one ranked dataset written to the Redis cache

pub mod config;
pub mod error;
pub mod fetcher;
pub mod merge;
pub mod publisher;
pub mod redis;
pub mod sync;
pub mod timeutil;
pub mod transform;

pub use error::{FeedError, Result};

/// One extracted item: field name to JSON value, keyed by `Id` and `Symbol`.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// One feed's dataset captured at a single poll.
pub type Snapshot = Vec<Record>;

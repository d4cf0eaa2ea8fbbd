//! Error taxonomy shared across the feed services.

use thiserror::Error;

/// Errors raised by the fetch/publish/merge pipeline.
///
/// Fatality depends on where the error surfaces: `Config` aborts startup,
/// `Api` and `Http` abort only the fetch cycle that raised them, and
/// `Decode` is downgraded to a missing feed by the synchronizer.
#[derive(Debug, Error)]
pub enum FeedError {
    /// A required dependency or config field is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Upstream API answered with a non-2xx status.
    #[error("upstream API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// Network-level HTTP failure (timeout, DNS, refused connection).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Redis command or connection failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stream entry that could not be unpacked.
    #[error("malformed log entry: {0}")]
    Decode(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FeedError>;

//! Feed and synchronizer configuration.
//!
//! Feed configs are declarative JSON files (see `config/` at the workspace
//! root): endpoint, pagination parameters, a dotted path to the item list
//! and per-field extraction rules. The synchronizer reads its settings from
//! environment variables with defaults.

use crate::error::{FeedError, Result};
use crate::transform;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Extraction rule for one output field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    /// Output field name (e.g. `Price`).
    pub name: String,
    /// Dotted path into the upstream item (e.g. `quote.USD.price`).
    pub source: String,
    /// Fallback when the path is absent; `null` means no fallback.
    #[serde(default)]
    pub default: Value,
    /// Optional named transform, resolved against `transform::lookup`.
    #[serde(default)]
    pub transform: Option<String>,
}

/// Declarative description of one upstream feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Query parameters; `page` and `page_size` enable pagination.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Dotted path to the item list in the response body.
    pub data_path: String,
    /// Env var holding the credential substituted for `${API_KEY}`.
    #[serde(default)]
    pub api_key_env_var_name: Option<String>,
    pub fields: Vec<FieldRule>,
    /// Redis stream this feed publishes to.
    pub stream: String,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

impl FeedConfig {
    /// Load a feed config from a JSON file, resolving the `${API_KEY}`
    /// placeholder and validating every referenced transform name.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref()).map_err(|e| {
            FeedError::Config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        Self::from_json(&raw)
    }

    /// Parse a feed config from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self> {
        // The placeholder may appear anywhere (headers, url, parameters),
        // so substitution happens on the raw document before parsing.
        let parsed: Self = serde_json::from_str(raw)?;
        let raw = match &parsed.api_key_env_var_name {
            Some(var) => {
                let key = env::var(var).unwrap_or_default();
                raw.replace("${API_KEY}", &key)
            }
            None => raw.to_string(),
        };
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(FeedError::Config("feed url is empty".into()));
        }
        if self.stream.is_empty() {
            return Err(FeedError::Config("feed stream name is empty".into()));
        }
        if self.fields.is_empty() {
            return Err(FeedError::Config("feed has no field rules".into()));
        }
        for rule in &self.fields {
            if let Some(name) = &rule.transform {
                transform::lookup(name)?;
            }
        }
        Ok(())
    }

    /// Page size when pagination is configured.
    pub fn page_size(&self) -> Option<u64> {
        self.parameters.get("page_size").and_then(Value::as_u64)
    }

    /// Whether the config enables pagination at all.
    pub fn paginated(&self) -> bool {
        self.parameters.contains_key("page") && self.page_size().is_some()
    }
}

/// Synchronizer (merge loop) settings, loaded from the environment.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub redis_url: String,
    /// Streams to read each cycle, e.g. `["rank", "price"]`.
    pub source_streams: Vec<String>,
    /// Stream whose row order and membership define the merged output.
    pub main_stream: String,
    pub interval_secs: u64,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let redis_url = load_redis_url();
        let source_streams: Vec<String> = env::var("SOURCE_STREAMS")
            .unwrap_or_else(|_| "rank,price".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let main_stream = env::var("MAIN_STREAM").unwrap_or_else(|_| "rank".to_string());
        let interval_secs = env::var("SYNC_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_INTERVAL_SECS);

        let config = Self {
            redis_url,
            source_streams,
            main_stream,
            interval_secs,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.source_streams.len() < 2 {
            return Err(FeedError::Config(
                "synchronizer needs at least two source streams".into(),
            ));
        }
        if !self.source_streams.contains(&self.main_stream) {
            return Err(FeedError::Config(format!(
                "main stream '{}' is not among the source streams",
                self.main_stream
            )));
        }
        Ok(())
    }
}

/// Redis URL from the environment, defaulting to a local instance.
pub fn load_redis_url() -> String {
    env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string())
}

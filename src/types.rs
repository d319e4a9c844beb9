use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

/// SHA-256 hex digest; used for article identity, publisher ids and
/// content-addressed image names.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex_encode(&hasher.finalize())
}

pub fn sha256_hex_bytes(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex_encode(&hasher.finalize())
}

fn hex_encode(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Entry as extracted by the feed parser, before publisher fields are
/// injected and before URL canonicalization.
#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub title: String,
    pub link: String,
    pub updated: Option<DateTime<Utc>>,
    pub summary: String,
    pub content: String,
    pub media_url: Option<String>,
}

fn default_pop_score() -> f64 {
    1.0
}

/// An article flowing through the pipeline. Starts life as the output of the
/// article processor (`link` set, `url`/`url_hash` empty) and is filled in by
/// the unshortener, enrichers and image pipeline. The serialized form is the
/// artifact schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub publish_time: DateTime<Utc>,
    pub img: String,
    pub category: String,
    pub description: String,
    pub content_type: String,
    pub publisher_id: String,
    pub publisher_name: String,
    pub channels: Vec<String>,
    pub creative_instance_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub url_hash: String,
    #[serde(default = "default_pop_score")]
    pub pop_score: f64,
    #[serde(default)]
    pub padded_img: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_channels: Option<Vec<String>>,
    /// Pre-canonical link from the feed; consumed by the unshortener.
    #[serde(skip)]
    pub link: String,
}

/// Per-publisher bookkeeping surfaced in `report.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedStats {
    pub size_before: usize,
    pub size_after_insert: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub download_failed: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub parse_failed: u32,
}

fn is_zero(count: &u32) -> bool {
    *count == 0
}

/// Run report written to `{output_path}/report.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Report {
    pub feed_stats: HashMap<String, FeedStats>,
}

impl Report {
    pub fn stats_mut(&mut self, key: &str) -> &mut FeedStats {
        self.feed_stats.entry(key.to_string()).or_default()
    }
}

/// Raw feed body downloaded for one publisher. Transient; dropped after
/// parsing.
#[derive(Debug)]
pub struct DownloadedFeed {
    pub publisher_id: String,
    pub body: Vec<u8>,
}

/// Partial update for the aggregation run row. `Some` fields overwrite,
/// including zero values; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RunUpdate {
    pub run_time: Option<i64>,
    pub success: Option<bool>,
    pub feed_count: Option<i64>,
    pub start_article_count: Option<i64>,
    pub end_article_count: Option<i64>,
    pub cache_hit_count: Option<i64>,
}

/// One end-to-end pipeline execution for a single locale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationRun {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub run_time: i64,
    pub locale_name: String,
    pub success: bool,
    pub feed_count: i64,
    pub start_article_count: i64,
    pub end_article_count: i64,
    pub cache_hit_count: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out: {url}")]
    FetchTimeout { url: String },

    #[error("HTTP status {status} for {url}")]
    FetchStatus { url: String, status: u16 },

    #[error("response exceeds {limit} bytes: {url}")]
    ResponseTooLarge { url: String, limit: usize },

    #[error("feed parse error: {0}")]
    Parse(String),

    #[error("image rejected: {0}")]
    ImageRejected(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;

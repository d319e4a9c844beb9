use crate::types::{AggregatorError, Result};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Run configuration. Loaded once at startup and injected by value; nothing
/// mutates it after the orchestrator is constructed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Locale selector, e.g. `sources.en_US`.
    pub sources_file: String,
    /// In-flight request cap for network-bound stages.
    pub thread_pool_size: usize,
    /// Worker cap for CPU-bound stages.
    pub concurrency: usize,
    /// Per-request deadline in seconds.
    pub request_timeout: u64,
    /// Upper bound of the normalized popularity score.
    pub pop_score_range: f64,
    pub private_s3_bucket: String,
    pub pub_s3_bucket: String,
    pub pcdn_url_base: String,
    pub output_path: PathBuf,
    pub output_feed_path: PathBuf,
    pub feed_path: String,
    pub feed_sources_path: String,
    pub channel_file: String,
    pub no_upload: bool,
    pub default_headers: HashMap<String, String>,
    pub database_url: String,
    /// Byte cap for feed bodies.
    pub max_feed_size: usize,
    /// Byte cap for article images.
    pub max_image_size: usize,
    /// Images with every side below this are rejected.
    pub min_image_edge: u32,
    /// Cover canvas edge for padded images.
    pub cover_edge: u32,
    /// Locale that gets channel prediction calls.
    pub predicted_channels_locale: String,
    pub popularity_url: String,
    pub channel_classify_url: String,
    pub external_classify_url: String,
}

impl Config {
    /// Load configuration from environment variables. Missing required
    /// values are a fatal configuration error; everything else has a
    /// default.
    pub fn from_env() -> Result<Self> {
        let concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Ok(Self {
            sources_file: env_or("SOURCES_FILE", "sources.en_US"),
            thread_pool_size: parsed_env("THREAD_POOL_SIZE", 64)?,
            concurrency: parsed_env("CONCURRENCY", concurrency)?,
            request_timeout: parsed_env("REQUEST_TIMEOUT", 15)?,
            pop_score_range: parsed_env("POP_SCORE_RANGE", 100.0)?,
            private_s3_bucket: env_or("PRIVATE_S3_BUCKET", "brave-today-private"),
            pub_s3_bucket: env_or("PUB_S3_BUCKET", "brave-today"),
            pcdn_url_base: env_or("PCDN_URL_BASE", "https://pcdn.brave.com"),
            output_path: PathBuf::from(env_or("OUTPUT_PATH", "output")),
            output_feed_path: PathBuf::from(env_or("OUTPUT_FEED_PATH", "output/feed")),
            feed_path: env_or("FEED_PATH", "feed"),
            feed_sources_path: env_or("FEED_SOURCES_PATH", "feed_sources.json"),
            channel_file: env_or("CHANNEL_FILE", "channels.json"),
            no_upload: env::var("NO_UPLOAD").map(|v| v == "1" || v == "true").unwrap_or(false),
            default_headers: parse_headers(env::var("DEFAULT_HEADERS").ok())?,
            database_url: required_env("DATABASE_URL")?,
            max_feed_size: parsed_env("MAX_FEED_SIZE", 10_000_000)?,
            max_image_size: parsed_env("MAX_IMAGE_SIZE", 5_000_000)?,
            min_image_edge: parsed_env("MIN_IMAGE_EDGE", 50)?,
            cover_edge: parsed_env("COVER_EDGE", 256)?,
            predicted_channels_locale: env_or("PREDICTED_CHANNELS_LOCALE", "en_US"),
            popularity_url: env_or("POPULARITY_URL", "http://localhost:8091/popularity"),
            channel_classify_url: env_or("CHANNEL_CLASSIFY_URL", "http://localhost:8092/predict"),
            external_classify_url: env_or("EXTERNAL_CLASSIFY_URL", "http://localhost:8093/classify"),
        })
    }

    /// Locale name derived from the sources file, e.g. `en_US`.
    pub fn locale_name(&self) -> String {
        self.sources_file.replace("sources.", "")
    }

    /// Locale suffix used in upload keys, e.g. `.en_US`.
    pub fn locale_suffix(&self) -> String {
        self.sources_file.replace("sources", "")
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| AggregatorError::Config(format!("{} must be set", key)))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AggregatorError::Config(format!("{} is not a valid value", key))),
        Err(_) => Ok(default),
    }
}

/// `DEFAULT_HEADERS` is a JSON object of header name to value.
fn parse_headers(raw: Option<String>) -> Result<HashMap<String, String>> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => {
            serde_json::from_str(&raw).map_err(AggregatorError::Serialization)
        }
        _ => Ok(HashMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn locale_name_strips_sources_prefix() {
        let mut config = test_config();
        config.sources_file = "sources.ja_JP".to_string();
        assert_eq!(config.locale_name(), "ja_JP");
        assert_eq!(config.locale_suffix(), ".ja_JP");
    }

    #[test]
    fn parse_headers_accepts_json_object() {
        let headers =
            parse_headers(Some(r#"{"Accept-Language": "en-US"}"#.to_string())).unwrap();
        assert_eq!(headers["Accept-Language"], "en-US");
        assert!(parse_headers(None).unwrap().is_empty());
    }

    pub(crate) fn test_config() -> Config {
        Config {
            sources_file: "sources.en_US".to_string(),
            thread_pool_size: 8,
            concurrency: 2,
            request_timeout: 5,
            pop_score_range: 100.0,
            private_s3_bucket: "private".to_string(),
            pub_s3_bucket: "public".to_string(),
            pcdn_url_base: "https://pcdn.test".to_string(),
            output_path: PathBuf::from("output"),
            output_feed_path: PathBuf::from("output/feed"),
            feed_path: "feed".to_string(),
            feed_sources_path: "feed_sources.json".to_string(),
            channel_file: "channels.json".to_string(),
            no_upload: true,
            default_headers: HashMap::new(),
            database_url: "postgresql://localhost/news".to_string(),
            max_feed_size: 10_000_000,
            max_image_size: 5_000_000,
            min_image_edge: 50,
            cover_edge: 256,
            predicted_channels_locale: "en_US".to_string(),
            popularity_url: "http://localhost:8091/popularity".to_string(),
            channel_classify_url: "http://localhost:8092/predict".to_string(),
            external_classify_url: "http://localhost:8093/classify".to_string(),
        }
    }
}

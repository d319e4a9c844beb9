use crate::config::Config;
use crate::types::{AggregatorError, Result};
use rand::seq::SliceRandom;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Fixed desktop browser/OS pool rotated across requests.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.2478.51",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 OPR/110.0.0.0",
];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Size-capped, deadline-bounded GET primitive. No retries; callers decide
/// what a failure means for their item.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    timeout: Duration,
    default_headers: HashMap<String, String>,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .connect_timeout(Duration::from_secs(config.request_timeout))
            .build()?;

        Ok(Self {
            client,
            timeout: Duration::from_secs(config.request_timeout),
            default_headers: config.default_headers.clone(),
        })
    }

    /// Fetch `url`, streaming the body and aborting once it exceeds
    /// `max_bytes`.
    pub async fn fetch(&self, url: &str, max_bytes: usize) -> Result<Vec<u8>> {
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .timeout(self.timeout);
        for (name, value) in &self.default_headers {
            request = request.header(name, value);
        }

        let mut response = request.send().await.map_err(|e| classify(e, url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AggregatorError::FetchStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(length) = response.content_length() {
            if length as usize > max_bytes {
                return Err(AggregatorError::ResponseTooLarge {
                    url: url.to_string(),
                    limit: max_bytes,
                });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| classify(e, url))? {
            if body.len() + chunk.len() > max_bytes {
                return Err(AggregatorError::ResponseTooLarge {
                    url: url.to_string(),
                    limit: max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!("Fetched {} ({} bytes)", url, body.len());
        Ok(body)
    }
}

fn classify(err: reqwest::Error, url: &str) -> AggregatorError {
    if err.is_timeout() {
        AggregatorError::FetchTimeout {
            url: url.to_string(),
        }
    } else {
        AggregatorError::Http(err)
    }
}

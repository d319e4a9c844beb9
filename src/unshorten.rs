use crate::config::Config;
use crate::db::Db;
use crate::fetcher::random_user_agent;
use crate::types::{sha256_hex, AggregatorError, Article, Result};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const MAX_REDIRECT_HOPS: usize = 10;

/// Resolves shortener links to canonical URLs by walking the redirect chain
/// hop by hop.
#[derive(Clone)]
pub struct Unshortener {
    client: Client,
    timeout: Duration,
}

impl Unshortener {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            timeout: Duration::from_secs(config.request_timeout),
        })
    }

    /// Follow redirects from `link` to a canonical absolute URL. Relative
    /// `Location` values are joined against the current hop. Past the hop
    /// cap the last URL wins.
    pub async fn resolve(&self, link: &str) -> Result<String> {
        let mut current = Url::parse(link)?;

        for _ in 0..MAX_REDIRECT_HOPS {
            let response = self
                .client
                .get(current.clone())
                .header(reqwest::header::USER_AGENT, random_user_agent())
                .timeout(self.timeout)
                .send()
                .await?;

            if !response.status().is_redirection() {
                return Ok(current.to_string());
            }

            let Some(location) = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
            else {
                return Ok(current.to_string());
            };

            current = current.join(location).map_err(AggregatorError::InvalidUrl)?;
        }

        Ok(current.to_string())
    }
}

/// Canonicalize every raw article and split the batch into the disjoint
/// `new` and `cached` streams. Articles whose link cannot be resolved are
/// dropped. A cache hit carries the stored enriched fields forward and
/// bumps the cache record counter.
pub async fn split_new_and_cached(
    articles: Vec<Article>,
    unshortener: &Unshortener,
    db: &Db,
    locale: &str,
    pool_size: usize,
) -> (Vec<Article>, Vec<Article>) {
    info!("Un-shortening the URLs of {} articles...", articles.len());

    enum Resolved {
        New(Article),
        Cached(Article),
        Dropped,
    }

    let resolved: Vec<Resolved> = stream::iter(articles)
        .map(|mut article| async move {
            let canonical = match unshortener.resolve(&article.link).await {
                Ok(url) => url,
                Err(e) => {
                    warn!("Failed to resolve {}: {}", article.link, e);
                    return Resolved::Dropped;
                }
            };

            article.url_hash = sha256_hex(&canonical);
            article.url = canonical;

            match db.get_cached_article(&article.url_hash, locale).await {
                Some(cached) => {
                    debug!("Article already aggregated: {}", cached.url);
                    Resolved::Cached(cached)
                }
                None => Resolved::New(article),
            }
        })
        .buffer_unordered(pool_size.max(1))
        .collect()
        .await;

    let mut new_articles = Vec::new();
    let mut cached_articles = Vec::new();
    for outcome in resolved {
        match outcome {
            Resolved::New(article) => new_articles.push(article),
            Resolved::Cached(article) => cached_articles.push(article),
            Resolved::Dropped => {}
        }
    }

    info!(
        "Split into {} new and {} cached articles",
        new_articles.len(),
        cached_articles.len()
    );
    (new_articles, cached_articles)
}

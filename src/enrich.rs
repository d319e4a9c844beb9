use crate::config::Config;
use crate::fetcher::random_user_agent;
use crate::types::{AggregatorError, Article, Result};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sum every numeric leaf of an arbitrarily nested JSON value. The
/// popularity service returns nested component maps; the raw score is their
/// total.
pub fn sum_numeric_leaves(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Array(items) => items.iter().map(sum_numeric_leaves).sum(),
        Value::Object(map) => map.values().map(sum_numeric_leaves).sum(),
        _ => 0.0,
    }
}

/// Client for the popularity scoring service.
#[derive(Clone)]
pub struct PopularityClient {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl PopularityClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: config.popularity_url.clone(),
            timeout: Duration::from_secs(config.request_timeout),
        })
    }

    /// Raw (un-normalized) popularity score for one canonical URL.
    pub async fn score(&self, url: &str) -> Result<f64> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .timeout(self.timeout)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AggregatorError::FetchStatus {
                url: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await?;
        Ok(sum_numeric_leaves(&body))
    }
}

/// Attach raw popularity scores to a batch. For new articles a service
/// failure drops the article; cached articles keep their stored score.
pub async fn popularity_pass(
    articles: Vec<Article>,
    client: &PopularityClient,
    pool_size: usize,
    keep_on_failure: bool,
) -> Vec<Article> {
    info!(
        "Getting the popularity score for {} articles...",
        articles.len()
    );

    let scored: Vec<Option<Article>> = stream::iter(articles)
        .map(|mut article| async move {
            match client.score(&article.url).await {
                Ok(raw) => {
                    article.pop_score = raw;
                    Some(article)
                }
                Err(e) if keep_on_failure => {
                    debug!("Popularity lookup failed for {}, keeping prior score: {}", article.url, e);
                    Some(article)
                }
                Err(e) => {
                    warn!("Popularity lookup failed for {}, dropping: {}", article.url, e);
                    None
                }
            }
        })
        .buffer_unordered(pool_size.max(1))
        .collect()
        .await;

    scored.into_iter().flatten().collect()
}

/// Min-max normalize a batch into `[1.0, range]`. A degenerate batch
/// (`min == max`) collapses to 1.0 everywhere.
pub fn normalize_pop_scores(articles: &mut [Article], range: f64) {
    let Some(first) = articles.first() else {
        return;
    };
    let mut min = first.pop_score;
    let mut max = first.pop_score;
    for article in articles.iter() {
        min = min.min(article.pop_score);
        max = max.max(article.pop_score);
    }

    for article in articles.iter_mut() {
        let normalized = if max != min {
            range * (article.pop_score - min) / (max - min)
        } else {
            1.0
        };
        article.pop_score = normalized.max(1.0);
    }
}

/// Client for the internal channel prediction service; only called for the
/// predicted-channels locale.
#[derive(Clone)]
pub struct ChannelClassifier {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl ChannelClassifier {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: config.channel_classify_url.clone(),
            timeout: Duration::from_secs(config.request_timeout),
        })
    }

    pub async fn predict(&self, url: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AggregatorError::FetchStatus {
                url: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await?;
        let channels = body
            .get("channels")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|c| c.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(channels)
    }
}

/// Attach predicted channels to each article. Failures are non-fatal; the
/// article keeps its catalog channels.
pub async fn predict_channels(
    articles: Vec<Article>,
    classifier: &ChannelClassifier,
    pool_size: usize,
) -> Vec<Article> {
    info!(
        "Getting the predicted channels for {} articles...",
        articles.len()
    );

    stream::iter(articles)
        .map(|mut article| async move {
            match classifier.predict(&article.url).await {
                Ok(channels) if !channels.is_empty() => {
                    article.predicted_channels = Some(channels);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Channel prediction failed for {}: {}", article.url, e);
                }
            }
            article
        })
        .buffer_unordered(pool_size.max(1))
        .collect()
        .await
}

/// A channel name with the classifier's confidence, as returned by the
/// external classification service.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ChannelConfidence {
    pub name: String,
    pub confidence: f64,
}

/// Client for the external classification service.
#[derive(Clone)]
pub struct ExternalClassifier {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl ExternalClassifier {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: config.external_classify_url.clone(),
            timeout: Duration::from_secs(config.request_timeout),
        })
    }

    /// Channels plus the raw confidence list for one canonical URL.
    pub async fn classify(&self, url: &str) -> Result<(Vec<String>, Vec<ChannelConfidence>)> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AggregatorError::FetchStatus {
                url: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await?;
        let raw: Vec<ChannelConfidence> = body
            .get("results")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let channels = raw.iter().map(|c| c.name.clone()).collect();
        Ok((channels, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sums_nested_numeric_components() {
        let value: Value = serde_json::from_str(
            r#"{"popularity": {"popularity": {"score1": 1, "score2": 2}}}"#,
        )
        .unwrap();
        assert_eq!(sum_numeric_leaves(&value), 3.0);
    }

    #[test]
    fn sums_arrays_and_ignores_strings() {
        let value: Value =
            serde_json::from_str(r#"{"scores": [1.5, 2.5], "label": "ignored"}"#).unwrap();
        assert_eq!(sum_numeric_leaves(&value), 4.0);
    }

    fn article_with_score(raw: f64) -> Article {
        Article {
            title: "t".to_string(),
            publish_time: chrono::Utc::now(),
            img: String::new(),
            category: String::new(),
            description: String::new(),
            content_type: "article".to_string(),
            publisher_id: "p".to_string(),
            publisher_name: "P".to_string(),
            channels: vec![],
            creative_instance_id: String::new(),
            url: "http://a".to_string(),
            url_hash: String::new(),
            pop_score: raw,
            padded_img: String::new(),
            score: 0.0,
            predicted_channels: None,
            link: String::new(),
        }
    }

    #[test]
    fn normalization_spans_one_to_range() {
        let mut articles = vec![
            article_with_score(10.0),
            article_with_score(55.0),
            article_with_score(100.0),
        ];
        normalize_pop_scores(&mut articles, 100.0);
        assert_eq!(articles[0].pop_score, 1.0);
        assert_eq!(articles[1].pop_score, 50.0);
        assert_eq!(articles[2].pop_score, 100.0);
    }

    #[test]
    fn degenerate_batch_collapses_to_one() {
        let mut articles = vec![article_with_score(42.0), article_with_score(42.0)];
        normalize_pop_scores(&mut articles, 100.0);
        assert!(articles.iter().all(|a| a.pop_score == 1.0));
    }

    #[test]
    fn single_article_normalizes_to_one() {
        let mut articles = vec![article_with_score(10.0)];
        normalize_pop_scores(&mut articles, 100.0);
        assert_eq!(articles[0].pop_score, 1.0);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let mut articles: Vec<Article> = vec![];
        normalize_pop_scores(&mut articles, 100.0);
    }

    #[test]
    fn scores_never_fall_below_one() {
        let mut articles = vec![article_with_score(0.0), article_with_score(1000.0)];
        normalize_pop_scores(&mut articles, 100.0);
        assert!(articles.iter().all(|a| a.pop_score >= 1.0));
        assert!(articles.iter().all(|a| a.pop_score <= 100.0));
    }
}

use crate::publisher::Publisher;
use crate::types::Article;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Sort by `publish_time` descending, then deduplicate by `url_hash`.
/// Keeping the first occurrence under the sort keeps the freshest sighting
/// of each article.
pub fn dedupe_and_sort(mut articles: Vec<Article>) -> Vec<Article> {
    info!("Sorting {} items...", articles.len());
    articles.sort_by(|a, b| b.publish_time.cmp(&a.publish_time));

    let mut seen = HashSet::new();
    articles.retain(|article| seen.insert(article.url_hash.clone()));
    articles
}

/// Composite ranking score: the normalized popularity under a recency
/// decay with a 12 hour scale, plus the catalog weight of the publisher.
pub fn compute_score(
    pop_score: f64,
    publish_time: DateTime<Utc>,
    publisher_score: f64,
    now: DateTime<Utc>,
) -> f64 {
    let age_hours = (now - publish_time).num_seconds().max(0) as f64 / 3600.0;
    pop_score / (1.0 + age_hours / 12.0) + 10.0 * publisher_score
}

/// Score the ranked set in place. The publisher weight comes from the
/// catalog; articles from publishers that dropped out of it weigh zero.
pub fn score_entries(articles: &mut [Article], publishers: &HashMap<String, Publisher>) {
    let now = Utc::now();
    for article in articles.iter_mut() {
        let publisher_score = publishers
            .get(&article.publisher_id)
            .map(|p| p.score)
            .unwrap_or(0.0);
        article.score = compute_score(article.pop_score, article.publish_time, publisher_score, now);
    }
}

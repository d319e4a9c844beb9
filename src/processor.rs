use crate::profanity::contains_profanity;
use crate::publisher::Publisher;
use crate::types::{Article, ParsedEntry, Report};
use futures::stream::{self, StreamExt};
use scraper::{Html, Selector};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Reduce a fragment to plain text: every tag and attribute is outside the
/// allowlist. The `&amp;` fixup mirrors what the catalog normalization has
/// always done.
pub fn strip_html(input: &str) -> String {
    ammonia::Builder::empty()
        .clean(input)
        .to_string()
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// First `<img src>` in an HTML fragment, if any.
pub fn first_img_src(html: &str) -> Option<String> {
    if html.is_empty() {
        return None;
    }
    let fragment = Html::parse_fragment(html);
    let selector = Selector::parse("img").ok()?;
    fragment
        .select(&selector)
        .find_map(|img| img.value().attr("src"))
        .map(|src| src.to_string())
}

/// `og:image` URL from a full article page.
pub fn og_image_url(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"meta[property="og:image"]"#).ok()?;
    document
        .select(&selector)
        .find_map(|meta| meta.value().attr("content"))
        .map(|content| content.to_string())
}

/// Normalize one parsed entry into an article, or reject it. Rejections:
/// empty title, profanity in the title, missing timestamp. The canonical
/// `url`/`url_hash` stay empty until the unshortener runs.
pub fn process_entry(entry: ParsedEntry, publisher: &Publisher) -> Option<Article> {
    let title = strip_html(&entry.title);
    if title.is_empty() {
        debug!("Dropping untitled entry from {}", publisher.publisher_id);
        return None;
    }
    if contains_profanity(&title) {
        debug!("Dropping profane entry from {}", publisher.publisher_id);
        return None;
    }

    let publish_time = match entry.updated {
        Some(ts) => ts,
        None => {
            debug!("Dropping undated entry from {}", publisher.publisher_id);
            return None;
        }
    };

    let img = entry
        .media_url
        .clone()
        .or_else(|| first_img_src(&entry.content))
        .or_else(|| first_img_src(&entry.summary))
        .unwrap_or_default();

    Some(Article {
        title,
        publish_time,
        img,
        category: publisher.category.clone(),
        description: strip_html(&entry.summary),
        content_type: publisher.content_type.clone(),
        publisher_id: publisher.publisher_id.clone(),
        publisher_name: publisher.publisher_name.clone(),
        channels: publisher.channels.clone(),
        creative_instance_id: publisher.creative_instance_id.clone(),
        url: String::new(),
        url_hash: String::new(),
        pop_score: 1.0,
        padded_img: String::new(),
        score: 0.0,
        predicted_channels: None,
        link: entry.link,
    })
}

/// Run every parsed feed through the processor on the CPU pool. Kept
/// articles count toward `size_after_insert`.
pub async fn process_all(
    feeds: Vec<(String, Vec<ParsedEntry>)>,
    publishers: &HashMap<String, Publisher>,
    concurrency: usize,
    report: &mut Report,
) -> Vec<Article> {
    info!(
        "Fixing up and extracting the data for the items in {} feeds...",
        feeds.len()
    );

    let jobs: Vec<(String, Vec<ParsedEntry>, Publisher)> = feeds
        .into_iter()
        .filter_map(|(key, entries)| {
            let publisher = publishers.get(&key)?.clone();
            Some((key, entries, publisher))
        })
        .collect();

    let results: Vec<(String, Vec<Article>)> = stream::iter(jobs)
        .map(|(key, entries, publisher)| async move {
            let processed = tokio::task::spawn_blocking(move || {
                entries
                    .into_iter()
                    .filter_map(|entry| process_entry(entry, &publisher))
                    .collect::<Vec<_>>()
            })
            .await;
            match processed {
                Ok(articles) => (key, articles),
                Err(e) => {
                    warn!("Article processing worker died for {}: {}", key, e);
                    (key, Vec::new())
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut articles = Vec::new();
    for (key, kept) in results {
        report.stats_mut(&key).size_after_insert = kept.len();
        articles.extend(kept);
    }

    info!("Processed down to {} raw articles", articles.len());
    articles
}

/// Strip title and description down to plain text. Applied to new articles
/// after enrichment; cached articles were scrubbed by the run that stored
/// them.
pub fn scrub_article(mut article: Article) -> Article {
    article.title = strip_html(&article.title);
    article.description = strip_html(&article.description);
    article
}

/// Scrub pass over the article set on the CPU pool.
pub async fn scrub_all(articles: Vec<Article>, concurrency: usize) -> Vec<Article> {
    info!("Scrubbing {} items...", articles.len());
    stream::iter(articles)
        .map(|article| async move {
            tokio::task::spawn_blocking(move || scrub_article(article))
                .await
                .ok()
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<Option<Article>>>()
        .await
        .into_iter()
        .flatten()
        .collect()
}

use crate::publisher::Publisher;
use crate::types::{AggregatorError, DownloadedFeed, ParsedEntry, Report, Result};
use chrono::Utc;
use feed_rs::parser;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Parse one raw feed body into normalized entries. `size_before` is the
/// entry count before the per-publisher cap. Entries are capped most-recent
/// first.
pub fn parse_feed_body(body: &[u8], max_entries: usize) -> Result<(usize, Vec<ParsedEntry>)> {
    let feed = parser::parse(body)
        .map_err(|e| AggregatorError::Parse(format!("failed to parse feed: {}", e)))?;

    let mut entries: Vec<ParsedEntry> = feed
        .entries
        .into_iter()
        .filter_map(parse_entry)
        .collect();
    let size_before = entries.len();

    entries.sort_by(|a, b| b.updated.cmp(&a.updated));
    entries.truncate(max_entries);

    Ok((size_before, entries))
}

fn parse_entry(entry: feed_rs::model::Entry) -> Option<ParsedEntry> {
    let link = entry.links.first()?.href.clone();
    let title = entry.title.map(|t| t.content).unwrap_or_default();
    let summary = entry.summary.map(|s| s.content).unwrap_or_default();
    let content = entry
        .content
        .and_then(|c| c.body)
        .unwrap_or_default();

    let updated = entry
        .published
        .or(entry.updated)
        .map(|dt| dt.with_timezone(&Utc));

    let media_url = entry.media.iter().find_map(|media| {
        media
            .content
            .iter()
            .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
            .or_else(|| {
                media
                    .thumbnails
                    .first()
                    .map(|thumb| thumb.image.uri.clone())
            })
    });

    Some(ParsedEntry {
        title,
        link,
        updated,
        summary,
        content,
        media_url,
    })
}

/// Parse all downloaded feeds on the CPU pool. Feeds that fail to parse or
/// come back empty are dropped; stats land in the report either way.
pub async fn parse_feeds(
    downloads: Vec<DownloadedFeed>,
    publishers: &HashMap<String, Publisher>,
    concurrency: usize,
    report: &mut Report,
) -> Vec<(String, Vec<ParsedEntry>)> {
    info!("Parsing {} feeds...", downloads.len());

    let jobs: Vec<(String, Vec<u8>, usize)> = downloads
        .into_iter()
        .filter_map(|feed| {
            let max_entries = publishers.get(&feed.publisher_id)?.max_entries;
            Some((feed.publisher_id, feed.body, max_entries))
        })
        .collect();

    let results: Vec<(String, std::result::Result<Result<(usize, Vec<ParsedEntry>)>, tokio::task::JoinError>)> =
        stream::iter(jobs)
            .map(|(publisher_id, body, max_entries)| async move {
                let parsed =
                    tokio::task::spawn_blocking(move || parse_feed_body(&body, max_entries))
                        .await;
                (publisher_id, parsed)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

    let mut parsed_feeds = Vec::new();
    for (publisher_id, outcome) in results {
        match outcome {
            Ok(Ok((size_before, entries))) => {
                let stats = report.stats_mut(&publisher_id);
                stats.size_before = size_before;
                if entries.is_empty() {
                    debug!("Dropping empty feed {}", publisher_id);
                    continue;
                }
                parsed_feeds.push((publisher_id, entries));
            }
            Ok(Err(e)) => {
                warn!("Feed parse failed for {}: {}", publisher_id, e);
                report.stats_mut(&publisher_id).parse_failed += 1;
            }
            Err(e) => {
                warn!("Feed parse worker died for {}: {}", publisher_id, e);
                report.stats_mut(&publisher_id).parse_failed += 1;
            }
        }
    }

    info!("Parsed {} non-empty feeds", parsed_feeds.len());
    parsed_feeds
}

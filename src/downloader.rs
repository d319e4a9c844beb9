use crate::fetcher::Fetcher;
use crate::publisher::Publisher;
use crate::types::{DownloadedFeed, Report};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use tracing::{info, warn};

/// Fetch the raw bodies for every enabled publisher feed. Failures drop the
/// feed and are noted in the per-publisher stats; the survivors are handed to
/// the parser.
pub async fn download_feeds(
    fetcher: &Fetcher,
    publishers: &HashMap<String, Publisher>,
    pool_size: usize,
    max_feed_size: usize,
    report: &mut Report,
) -> Vec<DownloadedFeed> {
    info!("Downloading {} feeds...", publishers.len());

    let results: Vec<(String, crate::types::Result<Vec<u8>>)> =
        stream::iter(publishers.values())
            .map(|publisher| async move {
                let result = fetcher.fetch(&publisher.feed_url, max_feed_size).await;
                (publisher.publisher_id.clone(), result)
            })
            .buffer_unordered(pool_size.max(1))
            .collect()
            .await;

    let mut downloaded = Vec::with_capacity(results.len());
    for (publisher_id, result) in results {
        match result {
            Ok(body) => downloaded.push(DownloadedFeed { publisher_id, body }),
            Err(e) => {
                warn!("Feed download failed for {}: {}", publisher_id, e);
                report.stats_mut(&publisher_id).download_failed += 1;
            }
        }
    }

    info!(
        "Downloaded {}/{} feeds",
        downloaded.len(),
        publishers.len()
    );
    downloaded
}

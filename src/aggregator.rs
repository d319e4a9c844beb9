use crate::config::Config;
use crate::db::Db;
use crate::downloader::download_feeds;
use crate::enrich::{
    normalize_pop_scores, popularity_pass, predict_channels, ChannelClassifier,
    ExternalClassifier, PopularityClient,
};
use crate::fetcher::Fetcher;
use crate::images::ImagePipeline;
use crate::object_store::ObjectStore;
use crate::parser::parse_feeds;
use crate::processor::{process_all, scrub_all};
use crate::publisher::Publisher;
use crate::rank::{dedupe_and_sort, score_entries};
use crate::types::{Article, Report, Result, RunUpdate};
use crate::unshorten::{split_new_and_cached, Unshortener};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Drives one aggregation run for a single locale: download, parse,
/// process, canonicalize, enrich, image, scrub, rank, persist, emit.
pub struct Aggregator {
    config: Config,
    publishers: HashMap<String, Publisher>,
    db: Db,
    fetcher: Fetcher,
    unshortener: Unshortener,
    popularity: PopularityClient,
    channel_classifier: ChannelClassifier,
    external_classifier: ExternalClassifier,
    images: ImagePipeline,
    pub report: Report,
    pub aggregation_id: Uuid,
    pub start_time: DateTime<Utc>,
    locale: String,
}

impl Aggregator {
    /// Build the pipeline and create the run row. Failures in here are
    /// fatal; the run has not started.
    pub async fn new(
        config: Config,
        publishers: HashMap<String, Publisher>,
        db: Db,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        let fetcher = Fetcher::new(&config)?;
        let unshortener = Unshortener::new(&config)?;
        let popularity = PopularityClient::new(&config)?;
        let channel_classifier = ChannelClassifier::new(&config)?;
        let external_classifier = ExternalClassifier::new(&config)?;
        let images = ImagePipeline::new(fetcher.clone(), store, config.clone());

        let aggregation_id = Uuid::new_v4();
        let start_time = Utc::now();
        let locale = config.locale_name();
        info!(
            "{} - Starting aggregation with id {} for locale {}",
            start_time, aggregation_id, locale
        );
        db.insert_aggregation_stats(aggregation_id, start_time, &locale)
            .await?;

        Ok(Self {
            config,
            publishers,
            db,
            fetcher,
            unshortener,
            popularity,
            channel_classifier,
            external_classifier,
            images,
            report: Report::default(),
            aggregation_id,
            start_time,
            locale,
        })
    }

    /// Run every stage in order and write the feed artifact. Returns the
    /// emitted article set.
    pub async fn aggregate(&mut self) -> Result<Vec<Article>> {
        self.ensure_catalog().await;

        let downloads = download_feeds(
            &self.fetcher,
            &self.publishers,
            self.config.thread_pool_size,
            self.config.max_feed_size,
            &mut self.report,
        )
        .await;
        self.update_stats(RunUpdate {
            feed_count: Some(downloads.len() as i64),
            ..Default::default()
        })
        .await;

        let parsed = parse_feeds(
            downloads,
            &self.publishers,
            self.config.concurrency,
            &mut self.report,
        )
        .await;

        let raw_articles = process_all(
            parsed,
            &self.publishers,
            self.config.concurrency,
            &mut self.report,
        )
        .await;
        self.update_stats(RunUpdate {
            start_article_count: Some(raw_articles.len() as i64),
            ..Default::default()
        })
        .await;

        let (new_articles, cached_articles) = split_new_and_cached(
            raw_articles,
            &self.unshortener,
            &self.db,
            &self.locale,
            self.config.thread_pool_size,
        )
        .await;
        self.update_stats(RunUpdate {
            cache_hit_count: Some(cached_articles.len() as i64),
            ..Default::default()
        })
        .await;

        let mut new_articles = popularity_pass(
            new_articles,
            &self.popularity,
            self.config.thread_pool_size,
            false,
        )
        .await;
        normalize_pop_scores(&mut new_articles, self.config.pop_score_range);

        let mut cached_articles = popularity_pass(
            cached_articles,
            &self.popularity,
            self.config.thread_pool_size,
            true,
        )
        .await;
        normalize_pop_scores(&mut cached_articles, self.config.pop_score_range);

        if self.predicted_channels_enabled() {
            new_articles = predict_channels(
                new_articles,
                &self.channel_classifier,
                self.config.thread_pool_size,
            )
            .await;
        }

        let imaged_articles = self.images.run(new_articles, &self.publishers).await;

        let scrubbed_articles = scrub_all(imaged_articles, self.config.concurrency).await;

        let mut merged = scrubbed_articles.clone();
        merged.extend(cached_articles);
        let mut ranked = dedupe_and_sort(merged);
        score_entries(&mut ranked, &self.publishers);

        self.persist_articles(&ranked).await;

        if self.predicted_channels_enabled() {
            self.classify_external(&scrubbed_articles).await;
        }

        self.write_artifact(&ranked).await?;

        let run_time = (Utc::now() - self.start_time).num_seconds();
        self.update_stats(RunUpdate {
            run_time: Some(run_time),
            success: Some(true),
            end_article_count: Some(ranked.len() as i64),
            ..Default::default()
        })
        .await;

        info!(
            "Aggregation {} finished with {} articles in {}s",
            self.aggregation_id,
            ranked.len(),
            run_time
        );
        Ok(ranked)
    }

    fn predicted_channels_enabled(&self) -> bool {
        self.locale == self.config.predicted_channels_locale
    }

    /// Keep the running catalog rows in step with the publisher file so
    /// article inserts can reference their feed.
    async fn ensure_catalog(&self) {
        for publisher in self.publishers.values() {
            if let Err(e) = self.db.ensure_feed(publisher, &self.locale).await {
                error!(
                    "Failed to upsert catalog rows for {}: {}",
                    publisher.publisher_id, e
                );
            }
        }
    }

    async fn persist_articles(&self, articles: &[Article]) {
        info!("Persisting {} articles...", articles.len());
        stream::iter(articles)
            .for_each_concurrent(self.config.thread_pool_size.max(1), |article| async move {
                if let Err(e) = self
                    .db
                    .update_or_insert_article(article, &self.locale, self.aggregation_id)
                    .await
                {
                    error!("Error saving article {} to database: {}", article.url_hash, e);
                }
            })
            .await;
    }

    /// Fetch and persist external classifications for the freshly imaged
    /// articles. Non-fatal end to end.
    async fn classify_external(&self, articles: &[Article]) {
        info!(
            "Getting the external predicted channels for {} articles...",
            articles.len()
        );
        stream::iter(articles)
            .for_each_concurrent(self.config.thread_pool_size.max(1), |article| async move {
                match self.external_classifier.classify(&article.url).await {
                    Ok((channels, raw)) => {
                        if let Err(e) = self
                            .db
                            .insert_external_channels(&article.url_hash, &channels, &raw)
                            .await
                        {
                            error!(
                                "Failed to store external channels for {}: {}",
                                article.url_hash, e
                            );
                        }
                    }
                    Err(e) => {
                        warn!("External classification failed for {}: {}", article.url, e)
                    }
                }
            })
            .await;
    }

    /// Write the feed artifact next to a temp file and swap it in, so a
    /// crash mid-write never leaves a truncated feed behind.
    async fn write_artifact(&self, articles: &[Article]) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.output_feed_path).await?;
        let final_path = self
            .config
            .output_feed_path
            .join(format!("{}.json", self.config.feed_path));
        let tmp_path = self
            .config
            .output_feed_path
            .join(format!("{}.json-tmp", self.config.feed_path));

        let body = serde_json::to_vec(articles)?;
        tokio::fs::write(&tmp_path, &body).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;

        info!(
            "Wrote {} articles to {}",
            articles.len(),
            final_path.display()
        );
        Ok(())
    }

    async fn update_stats(&self, update: RunUpdate) {
        if let Err(e) = self
            .db
            .update_aggregation_stats(self.aggregation_id, update)
            .await
        {
            error!("Failed to update aggregation stats: {}", e);
        }
    }
}

use crate::config::Config;
use crate::fetcher::Fetcher;
use crate::object_store::ObjectStore;
use crate::processor::og_image_url;
use crate::publisher::Publisher;
use crate::types::{sha256_hex_bytes, AggregatorError, Article, Result};
use futures::stream::{self, StreamExt};
use image::{DynamicImage, GenericImage, GenericImageView, ImageFormat};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Images at or above this size get canvas-normalized and recompressed;
/// tiny ones (icons, trackers) are served from their original URL.
const NEEDS_PADDING_BYTES: usize = 4 * 1024;

const PADDED_IMAGE_PREFIX: &str = "brave-today/padded_images";

/// Three-phase image stage: size-capped download (I/O pool), small-image
/// filter (CPU pool), pad + recompress + upload for the large ones (CPU
/// pool, then the store). Decoder failures and panics drop only the
/// offending article.
pub struct ImagePipeline {
    fetcher: Fetcher,
    store: Arc<dyn ObjectStore>,
    config: Config,
}

impl ImagePipeline {
    pub fn new(fetcher: Fetcher, store: Arc<dyn ObjectStore>, config: Config) -> Self {
        Self {
            fetcher,
            store,
            config,
        }
    }

    pub async fn run(
        &self,
        articles: Vec<Article>,
        publishers: &HashMap<String, Publisher>,
    ) -> Vec<Article> {
        let articles = self.resolve_og_images(articles, publishers).await;

        info!("Checking images for padding from {} items...", articles.len());
        let downloaded = self.download_all(articles).await;

        info!("Checking images for {} items...", downloaded.len());
        let checked = self.filter_small(downloaded).await;

        info!("Caching images for items...");
        self.pad_and_upload(checked).await
    }

    /// Fill in missing primary images from the article page's `og:image`
    /// for publishers that opted in. Failures leave the image empty; the
    /// download phase drops imageless articles.
    async fn resolve_og_images(
        &self,
        articles: Vec<Article>,
        publishers: &HashMap<String, Publisher>,
    ) -> Vec<Article> {
        let candidates = articles
            .iter()
            .filter(|a| a.img.is_empty())
            .filter(|a| publishers.get(&a.publisher_id).is_some_and(|p| p.og_images))
            .count();
        if candidates == 0 {
            return articles;
        }
        debug!("Resolving og:image for {} articles", candidates);

        stream::iter(articles)
            .map(|mut article| {
                let wants_og = article.img.is_empty()
                    && publishers
                        .get(&article.publisher_id)
                        .is_some_and(|p| p.og_images);
                async move {
                    if wants_og {
                        match self.fetcher.fetch(&article.url, self.config.max_feed_size).await {
                            Ok(body) => {
                                let html = String::from_utf8_lossy(&body);
                                if let Some(og) = og_image_url(&html) {
                                    article.img = og;
                                }
                            }
                            Err(e) => {
                                debug!("og:image fetch failed for {}: {}", article.url, e)
                            }
                        }
                    }
                    article
                }
            })
            .buffer_unordered(self.config.thread_pool_size.max(1))
            .collect()
            .await
    }

    /// Phase one: size-capped download. Yields `(article, bytes, is_large)`
    /// where `is_large` marks images past the needs-padding threshold.
    /// Imageless articles and fetch failures are dropped.
    async fn download_all(&self, articles: Vec<Article>) -> Vec<(Article, Vec<u8>, bool)> {
        let results: Vec<Option<(Article, Vec<u8>, bool)>> = stream::iter(articles)
            .map(|article| async move {
                if article.img.is_empty() {
                    debug!("Dropping imageless article {}", article.url);
                    return None;
                }
                match self
                    .fetcher
                    .fetch(&article.img, self.config.max_image_size)
                    .await
                {
                    Ok(bytes) => {
                        let is_large = bytes.len() >= NEEDS_PADDING_BYTES;
                        Some((article, bytes, is_large))
                    }
                    Err(e) => {
                        warn!("Image fetch failed for {}: {}", article.img, e);
                        None
                    }
                }
            })
            .buffer_unordered(self.config.thread_pool_size.max(1))
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }

    /// Phase two: decode on the CPU pool and reject images whose every side
    /// is below the minimum edge.
    async fn filter_small(
        &self,
        items: Vec<(Article, Vec<u8>, bool)>,
    ) -> Vec<(Article, DynamicImage, bool)> {
        let min_edge = self.config.min_image_edge;

        let results: Vec<Option<(Article, DynamicImage, bool)>> = stream::iter(items)
            .map(|(article, bytes, is_large)| async move {
                let decoded = tokio::task::spawn_blocking(move || {
                    decode_and_check(&bytes, min_edge).map(|image| (article, image, is_large))
                })
                .await;
                match decoded {
                    Ok(Ok(item)) => Some(item),
                    Ok(Err(e)) => {
                        debug!("Image rejected: {}", e);
                        None
                    }
                    Err(e) => {
                        warn!("Image decode worker died: {}", e);
                        None
                    }
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }

    /// Phase three: large images are canvas-padded, re-encoded and stored
    /// under a content-addressed key; the article's `padded_img` is
    /// rewritten to the CDN URL. Small survivors pass through with
    /// `padded_img = img`.
    async fn pad_and_upload(&self, items: Vec<(Article, DynamicImage, bool)>) -> Vec<Article> {
        let results: Vec<Option<Article>> = stream::iter(items)
            .map(|(mut article, image, is_large)| async move {
                if !is_large {
                    article.padded_img = article.img.clone();
                    return Some(article);
                }

                let encoded =
                    tokio::task::spawn_blocking(move || pad_image(&image)).await;
                let png = match encoded {
                    Ok(Ok(png)) => png,
                    Ok(Err(e)) => {
                        warn!("Image padding failed for {}: {}", article.img, e);
                        return None;
                    }
                    Err(e) => {
                        warn!("Image padding worker died for {}: {}", article.img, e);
                        return None;
                    }
                };

                let key = format!("{}/{}.png", PADDED_IMAGE_PREFIX, sha256_hex_bytes(&png));
                if let Err(e) = self
                    .store
                    .put(&self.config.private_s3_bucket, &key, &png)
                    .await
                {
                    warn!("Image upload failed for {}: {}", article.img, e);
                    return None;
                }

                article.padded_img = format!("{}/{}", self.config.pcdn_url_base, key);
                Some(article)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let survivors: Vec<Article> = results.into_iter().flatten().collect();
        info!("{} articles kept an image", survivors.len());
        survivors
    }
}

fn decode_and_check(bytes: &[u8], min_edge: u32) -> Result<DynamicImage> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| AggregatorError::ImageRejected(format!("undecodable image: {}", e)))?;
    let (width, height) = image.dimensions();
    if width < min_edge && height < min_edge {
        return Err(AggregatorError::ImageRejected(format!(
            "image too small: {}x{}",
            width, height
        )));
    }
    Ok(image)
}

/// Center the image on a square canvas sized to its larger edge and
/// re-encode as PNG. Primary dimensions are preserved; only the canvas
/// grows.
pub fn pad_image(image: &DynamicImage) -> Result<Vec<u8>> {
    let (width, height) = image.dimensions();
    let edge = width.max(height);

    let mut canvas = DynamicImage::new_rgba8(edge, edge);
    let x = (edge - width) / 2;
    let y = (edge - height) / 2;
    canvas
        .copy_from(image, x, y)
        .map_err(|e| AggregatorError::ImageRejected(format!("canvas paste failed: {}", e)))?;

    let mut buffer = Vec::new();
    canvas
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| AggregatorError::ImageRejected(format!("png encode failed: {}", e)))?;
    Ok(buffer)
}

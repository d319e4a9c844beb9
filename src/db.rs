use crate::enrich::ChannelConfidence;
use crate::publisher::Publisher;
use crate::types::{Article, Result, RunUpdate};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Persistence adapter over the `news` schema. Every per-article operation
/// is catch-and-log at the call site; a database error on one article never
/// aborts the run.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect and bring the schema up to date. An unreachable database here
    /// is fatal; no run row has been created yet.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;
        Ok(Self { pool })
    }

    /// Create the aggregation run row with its partial starting fields.
    pub async fn insert_aggregation_stats(
        &self,
        id: Uuid,
        start_time: DateTime<Utc>,
        locale_name: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO news.aggregation_stats (id, start_time, locale_name)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id)
        .bind(start_time)
        .bind(locale_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Partial update of the run row. Named fields overwrite, including
    /// zeroes; unnamed fields are untouched. Idempotent.
    pub async fn update_aggregation_stats(&self, id: Uuid, update: RunUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE news.aggregation_stats
            SET run_time = COALESCE($2, run_time),
                success = COALESCE($3, success),
                feed_count = COALESCE($4, feed_count),
                start_article_count = COALESCE($5, start_article_count),
                end_article_count = COALESCE($6, end_article_count),
                cache_hit_count = COALESCE($7, cache_hit_count)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.run_time)
        .bind(update.success)
        .bind(update.feed_count)
        .bind(update.start_article_count)
        .bind(update.end_article_count)
        .bind(update.cache_hit_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_or_create_locale(&self, locale: &str) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT INTO news.locales (locale, name)
            VALUES ($1, $1)
            ON CONFLICT (locale) DO NOTHING
            "#,
        )
        .bind(locale)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id FROM news.locales WHERE locale = $1")
            .bind(locale)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("id")?)
    }

    /// Upsert the catalog rows (feed, locale association, channels) for one
    /// publisher so articles can reference them. The full catalog ingest is a
    /// separate job; this keeps the running catalog consistent.
    pub async fn ensure_feed(&self, publisher: &Publisher, locale: &str) -> Result<i64> {
        let locale_id = self.get_or_create_locale(locale).await?;

        let row = sqlx::query(
            r#"
            INSERT INTO news.feeds (url, url_hash, name, category, enabled, og_images, max_entries, score)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (url_hash) DO UPDATE
                SET name = EXCLUDED.name,
                    category = EXCLUDED.category,
                    enabled = EXCLUDED.enabled,
                    og_images = EXCLUDED.og_images,
                    max_entries = EXCLUDED.max_entries,
                    score = EXCLUDED.score,
                    modified = now()
            RETURNING id
            "#,
        )
        .bind(&publisher.feed_url)
        .bind(&publisher.publisher_id)
        .bind(&publisher.publisher_name)
        .bind(&publisher.category)
        .bind(publisher.enabled)
        .bind(publisher.og_images)
        .bind(publisher.max_entries as i64)
        .bind(publisher.score)
        .fetch_one(&self.pool)
        .await?;
        let feed_id: i64 = row.try_get("id")?;

        let row = sqlx::query(
            r#"
            INSERT INTO news.feed_locales (feed_id, locale_id)
            VALUES ($1, $2)
            ON CONFLICT (feed_id, locale_id) DO UPDATE SET feed_id = EXCLUDED.feed_id
            RETURNING id
            "#,
        )
        .bind(feed_id)
        .bind(locale_id)
        .fetch_one(&self.pool)
        .await?;
        let feed_locale_id: i64 = row.try_get("id")?;

        for channel in &publisher.channels {
            sqlx::query(
                r#"
                INSERT INTO news.channels (name)
                VALUES ($1)
                ON CONFLICT (name) DO NOTHING
                "#,
            )
            .bind(channel)
            .execute(&self.pool)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO news.feed_locale_channels (feed_locale_id, channel_id)
                SELECT $1, id FROM news.channels WHERE name = $2
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(feed_locale_id)
            .bind(channel)
            .execute(&self.pool)
            .await?;
        }

        Ok(feed_id)
    }

    /// Look up a previously aggregated article for this locale. A hit
    /// requires the article's feed to be associated with the locale and a
    /// retained image; it increments the cache record's counter by one and
    /// returns the stored enriched fields. Errors are logged and treated as
    /// a miss.
    pub async fn get_cached_article(&self, url_hash: &str, locale: &str) -> Option<Article> {
        match self.cached_article_inner(url_hash, locale).await {
            Ok(article) => article,
            Err(e) => {
                error!("Cache lookup failed for {}: {}", url_hash, e);
                None
            }
        }
    }

    async fn cached_article_inner(&self, url_hash: &str, locale: &str) -> Result<Option<Article>> {
        let row = sqlx::query(
            r#"
            SELECT a.id, a.title, a.publish_time, a.img, a.category, a.description,
                   a.content_type, a.creative_instance_id, a.url, a.url_hash,
                   a.pop_score, a.padded_img, a.score,
                   f.url_hash AS publisher_id, f.name AS publisher_name,
                   l.id AS locale_id
            FROM news.articles a
            JOIN news.feeds f ON f.id = a.feed_id
            JOIN news.feed_locales fl ON fl.feed_id = f.id
            JOIN news.locales l ON l.id = fl.locale_id
            WHERE a.url_hash = $1 AND l.locale = $2 AND a.img <> ''
            "#,
        )
        .bind(url_hash)
        .bind(locale)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let article_id: i64 = row.try_get("id")?;
        let locale_id: i64 = row.try_get("locale_id")?;

        let channels: Vec<String> = sqlx::query(
            r#"
            SELECT c.name
            FROM news.channels c
            JOIN news.feed_locale_channels flc ON flc.channel_id = c.id
            JOIN news.feed_locales fl ON fl.id = flc.feed_locale_id
            JOIN news.feeds f ON f.id = fl.feed_id
            JOIN news.articles a ON a.feed_id = f.id
            WHERE a.id = $1 AND fl.locale_id = $2
            "#,
        )
        .bind(article_id)
        .bind(locale_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .filter_map(|row| row.try_get("name").ok())
        .collect();

        sqlx::query(
            r#"
            UPDATE news.article_cache_records
            SET cache_hit = cache_hit + 1
            WHERE article_id = $1 AND locale_id = $2
            "#,
        )
        .bind(article_id)
        .bind(locale_id)
        .execute(&self.pool)
        .await?;

        debug!("Cache hit for {}", url_hash);
        Ok(Some(Article {
            title: row.try_get("title")?,
            publish_time: row.try_get("publish_time")?,
            img: row.try_get("img")?,
            category: row.try_get("category")?,
            description: row.try_get("description")?,
            content_type: row.try_get("content_type")?,
            publisher_id: row.try_get("publisher_id")?,
            publisher_name: row.try_get("publisher_name")?,
            channels,
            creative_instance_id: row.try_get("creative_instance_id")?,
            url: row.try_get("url")?,
            url_hash: row.try_get("url_hash")?,
            pop_score: row.try_get("pop_score")?,
            padded_img: row.try_get("padded_img")?,
            score: row.try_get("score")?,
            predicted_channels: None,
            link: String::new(),
        }))
    }

    /// Upsert one article and guarantee a cache record for this locale.
    /// Concurrent callers for the same `url_hash` converge on last-writer-
    /// wins for the mutable fields; the cache record is unique per
    /// `(article_id, locale_id)`.
    pub async fn update_or_insert_article(
        &self,
        article: &Article,
        locale: &str,
        aggregation_id: Uuid,
    ) -> Result<()> {
        let locale_id = self.get_or_create_locale(locale).await?;

        let feed_id: Option<i64> = sqlx::query(
            r#"
            SELECT f.id
            FROM news.feeds f
            JOIN news.feed_locales fl ON fl.feed_id = f.id
            JOIN news.locales l ON l.id = fl.locale_id
            WHERE f.url_hash = $1 AND l.locale = $2
            "#,
        )
        .bind(&article.publisher_id)
        .bind(locale)
        .fetch_optional(&self.pool)
        .await?
        .and_then(|row| row.try_get("id").ok());

        let row = sqlx::query(
            r#"
            INSERT INTO news.articles
                (title, publish_time, img, category, description, content_type,
                 creative_instance_id, url, url_hash, pop_score, padded_img,
                 score, feed_id, aggregation_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (url_hash) DO UPDATE
                SET title = EXCLUDED.title,
                    publish_time = EXCLUDED.publish_time,
                    description = EXCLUDED.description,
                    pop_score = EXCLUDED.pop_score,
                    score = EXCLUDED.score,
                    img = CASE WHEN EXCLUDED.img <> '' AND news.articles.img <> EXCLUDED.img
                               THEN EXCLUDED.img ELSE news.articles.img END,
                    padded_img = CASE WHEN EXCLUDED.img <> '' AND news.articles.img <> EXCLUDED.img
                                      THEN EXCLUDED.padded_img ELSE news.articles.padded_img END
            RETURNING id
            "#,
        )
        .bind(&article.title)
        .bind(article.publish_time)
        .bind(&article.img)
        .bind(&article.category)
        .bind(&article.description)
        .bind(&article.content_type)
        .bind(&article.creative_instance_id)
        .bind(&article.url)
        .bind(&article.url_hash)
        .bind(article.pop_score)
        .bind(&article.padded_img)
        .bind(article.score)
        .bind(feed_id)
        .bind(aggregation_id)
        .fetch_one(&self.pool)
        .await?;
        let article_id: i64 = row.try_get("id")?;

        sqlx::query(
            r#"
            INSERT INTO news.article_cache_records (article_id, locale_id, aggregation_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (article_id, locale_id) DO NOTHING
            "#,
        )
        .bind(article_id)
        .bind(locale_id)
        .bind(aggregation_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist an external classification. Silently a no-op when the article
    /// is not in the store.
    pub async fn insert_external_channels(
        &self,
        url_hash: &str,
        channels: &[String],
        raw: &[ChannelConfidence],
    ) -> Result<()> {
        let article_id: Option<i64> =
            sqlx::query("SELECT id FROM news.articles WHERE url_hash = $1")
                .bind(url_hash)
                .fetch_optional(&self.pool)
                .await?
                .and_then(|row| row.try_get("id").ok());

        let Some(article_id) = article_id else {
            debug!("No article for external channels: {}", url_hash);
            return Ok(());
        };

        sqlx::query(
            r#"
            INSERT INTO news.external_article_classifications (article_id, channels, raw_data)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(article_id)
        .bind(channels.to_vec())
        .bind(serde_json::to_value(raw)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Sorted distinct channel names, for the channel list artifact.
    pub async fn get_channels(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT name FROM news.channels ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        let mut channels = Vec::with_capacity(rows.len());
        for row in rows {
            channels.push(row.try_get("name")?);
        }
        info!("Loaded {} distinct channels", channels.len());
        Ok(channels)
    }
}

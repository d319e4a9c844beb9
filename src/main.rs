use news_aggregator::object_store::ObjectStore;
use news_aggregator::{load_publishers, Aggregator, Config, Db};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // Anything that fails before the run row exists is fatal by design.
    let config = Config::from_env()?;
    let locale_suffix = config.locale_suffix();

    let sources_path = config.output_path.join(&config.feed_sources_path);
    let publishers = load_publishers(&sources_path)?;

    let db = Db::connect(&config.database_url).await?;
    let store = news_aggregator::object_store::from_config(&config);

    let mut aggregator =
        Aggregator::new(config.clone(), publishers, db.clone(), store.clone()).await?;
    let articles = aggregator.aggregate().await?;
    info!("Feed has {} items", articles.len());

    // Channel list artifact from the store.
    let channels = db.get_channels().await?;
    tokio::fs::create_dir_all(&config.output_path).await?;
    let channel_path = config.output_path.join(&config.channel_file);
    tokio::fs::write(&channel_path, serde_json::to_vec(&channels)?).await?;

    // Per-feed stats report.
    let report_path = config.output_path.join("report.json");
    tokio::fs::write(&report_path, serde_json::to_vec(&aggregator.report)?).await?;

    if !config.no_upload {
        let feed_file = config
            .output_feed_path
            .join(format!("{}.json", config.feed_path));
        let feed_bytes = tokio::fs::read(&feed_file).await?;

        let key = format!("brave-today/{}{}.json", config.feed_path, locale_suffix);
        store.put(&config.pub_s3_bucket, &key, &feed_bytes).await?;

        // Legacy no-dot key, still read by older clients.
        let legacy_key = format!("brave-today/{}{}json", config.feed_path, locale_suffix);
        store
            .put(&config.pub_s3_bucket, &legacy_key, &feed_bytes)
            .await?;

        let channel_bytes = tokio::fs::read(&channel_path).await?;
        let channel_key = format!("brave-today/{}", config.channel_file);
        store
            .put(&config.pub_s3_bucket, &channel_key, &channel_bytes)
            .await?;
    }

    info!("Aggregation run complete");
    Ok(())
}

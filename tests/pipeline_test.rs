use chrono::{TimeZone, Utc};
use news_aggregator::downloader::download_feeds;
use news_aggregator::enrich::{normalize_pop_scores, popularity_pass, PopularityClient};
use news_aggregator::fetcher::Fetcher;
use news_aggregator::parser::parse_feeds;
use news_aggregator::processor::process_all;
use news_aggregator::rank::{dedupe_and_sort, score_entries};
use news_aggregator::types::{Article, Report};
use news_aggregator::{Config, Publisher};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::path::PathBuf;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(popularity_url: String) -> Config {
    Config {
        sources_file: "sources.en_US".to_string(),
        thread_pool_size: 8,
        concurrency: 2,
        request_timeout: 2,
        pop_score_range: 100.0,
        private_s3_bucket: "private".to_string(),
        pub_s3_bucket: "public".to_string(),
        pcdn_url_base: "https://pcdn.test".to_string(),
        output_path: PathBuf::from("output"),
        output_feed_path: PathBuf::from("output/feed"),
        feed_path: "feed".to_string(),
        feed_sources_path: "feed_sources.json".to_string(),
        channel_file: "channels.json".to_string(),
        no_upload: true,
        default_headers: HashMap::new(),
        database_url: "postgresql://localhost/news".to_string(),
        max_feed_size: 10_000_000,
        max_image_size: 5_000_000,
        min_image_edge: 50,
        cover_edge: 256,
        predicted_channels_locale: "en_US".to_string(),
        popularity_url,
        channel_classify_url: String::new(),
        external_classify_url: String::new(),
    }
}

fn publisher(id: &str, feed_url: String) -> Publisher {
    Publisher {
        publisher_id: id.to_string(),
        publisher_name: "Example Publisher".to_string(),
        site_url: "https://example.com".to_string(),
        feed_url,
        category: "Tech".to_string(),
        enabled: true,
        max_entries: 20,
        channels: vec!["Technology".to_string()],
        og_images: false,
        creative_instance_id: String::new(),
        content_type: "article".to_string(),
        score: 0.5,
        destination_domains: vec![],
        original_feed: None,
    }
}

fn rss_body(title: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example Feed</title>
    <item>
      <title>{title}</title>
      <link>http://a/1</link>
      <pubDate>Tue, 02 Jan 2024 00:00:00 GMT</pubDate>
      <description>An example article</description>
    </item>
  </channel>
</rss>"#
    )
}

async fn run_feed_stages(
    server: &MockServer,
    title: &str,
) -> (Vec<Article>, Report) {
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_body(title)))
        .mount(server)
        .await;

    let config = test_config(String::new());
    let fetcher = Fetcher::new(&config).unwrap();
    let mut publishers = HashMap::new();
    publishers.insert(
        "p1".to_string(),
        publisher("p1", format!("{}/rss", server.uri())),
    );

    let mut report = Report::default();
    let downloads = download_feeds(&fetcher, &publishers, 8, 10_000_000, &mut report).await;
    assert_eq!(downloads.len(), 1);

    let parsed = parse_feeds(downloads, &publishers, 2, &mut report).await;
    let articles = process_all(parsed, &publishers, 2, &mut report).await;
    (articles, report)
}

#[tokio::test]
async fn one_feed_one_entry_yields_one_article() {
    let server = MockServer::start().await;
    let (articles, report) = run_feed_stages(&server, "Hello").await;

    assert_eq!(articles.len(), 1);
    let article = &articles[0];
    assert_eq!(article.title, "Hello");
    assert_eq!(article.link, "http://a/1");
    assert_eq!(article.publisher_id, "p1");
    assert_eq!(
        article.publish_time,
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    );

    let stats = &report.feed_stats["p1"];
    assert_eq!(stats.size_before, 1);
    assert_eq!(stats.size_after_insert, 1);
    assert_eq!(stats.download_failed, 0);
}

#[tokio::test]
async fn profane_entry_is_dropped_and_counted() {
    let server = MockServer::start().await;
    let (articles, report) = run_feed_stages(&server, "A fucking headline").await;

    assert!(articles.is_empty());
    let stats = &report.feed_stats["p1"];
    assert_eq!(stats.size_before, 1);
    assert_eq!(stats.size_after_insert, 0);
}

#[tokio::test]
async fn failed_download_is_reported_and_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = test_config(String::new());
    let fetcher = Fetcher::new(&config).unwrap();
    let mut publishers = HashMap::new();
    publishers.insert(
        "p1".to_string(),
        publisher("p1", format!("{}/rss", server.uri())),
    );

    let mut report = Report::default();
    let downloads = download_feeds(&fetcher, &publishers, 8, 10_000_000, &mut report).await;
    assert!(downloads.is_empty());
    assert_eq!(report.feed_stats["p1"].download_failed, 1);
}

fn canonical_article(url: &str, publish_time: chrono::DateTime<Utc>) -> Article {
    Article {
        title: "t".to_string(),
        publish_time,
        img: String::new(),
        category: String::new(),
        description: String::new(),
        content_type: "article".to_string(),
        publisher_id: "p1".to_string(),
        publisher_name: "P".to_string(),
        channels: vec![],
        creative_instance_id: String::new(),
        url: url.to_string(),
        url_hash: news_aggregator::types::sha256_hex(url),
        pop_score: 1.0,
        padded_img: String::new(),
        score: 0.0,
        predicted_channels: None,
        link: String::new(),
    }
}

#[tokio::test]
async fn popularity_partial_failure_drops_only_the_failing_article() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/popularity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "popularity": {"popularity": {"score1": 2, "score2": 3}}
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/popularity"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = test_config(format!("{}/popularity", server.uri()));
    let client = PopularityClient::new(&config).unwrap();

    let now = Utc::now();
    let articles = vec![
        canonical_article("http://a/1", now),
        canonical_article("http://a/2", now),
    ];

    // Fan out one at a time so the mock ordering is deterministic.
    let mut scored = popularity_pass(articles, &client, 1, false).await;
    assert_eq!(scored.len(), 1);

    normalize_pop_scores(&mut scored, 100.0);
    assert_eq!(scored[0].pop_score, 1.0);
}

#[tokio::test]
async fn ranked_output_is_unique_sorted_and_scored() {
    let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

    let mut duplicate = canonical_article("http://a/1", t2);
    duplicate.pop_score = 40.0;

    let articles = vec![
        canonical_article("http://a/1", t1),
        canonical_article("http://a/2", t1),
        duplicate,
    ];

    let mut ranked = dedupe_and_sort(articles);
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].url, "http://a/1");
    assert_eq!(ranked[0].publish_time, t2);

    let mut publishers = HashMap::new();
    publishers.insert("p1".to_string(), publisher("p1", "http://f/rss".to_string()));
    score_entries(&mut ranked, &publishers);
    assert!(ranked.iter().all(|a| a.score > 0.0));
}

#[tokio::test]
async fn artifact_serialization_matches_the_feed_schema() {
    let article = canonical_article(
        "http://a/1",
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
    );
    let value = serde_json::to_value(vec![article]).unwrap();
    let first = &value[0];

    for field in [
        "title",
        "publish_time",
        "img",
        "category",
        "description",
        "content_type",
        "publisher_id",
        "publisher_name",
        "channels",
        "creative_instance_id",
        "url",
        "url_hash",
        "pop_score",
        "padded_img",
        "score",
    ] {
        assert!(first.get(field).is_some(), "missing field {field}");
    }
    // Internal bookkeeping stays out of the artifact.
    assert!(first.get("link").is_none());
    assert!(first.get("predicted_channels").is_none());
}

use news_aggregator::fetcher::Fetcher;
use news_aggregator::types::AggregatorError;
use news_aggregator::unshorten::Unshortener;
use news_aggregator::Config;
use std::collections::HashMap;
use std::path::PathBuf;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config() -> Config {
    Config {
        sources_file: "sources.en_US".to_string(),
        thread_pool_size: 8,
        concurrency: 2,
        request_timeout: 1,
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
        popularity_url: String::new(),
        channel_classify_url: String::new(),
        external_classify_url: String::new(),
    }
}

#[tokio::test]
async fn fetch_returns_body_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"<rss/>".to_vec()))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(&test_config()).unwrap();
    let body = fetcher
        .fetch(&format!("{}/feed.xml", server.uri()), 1024)
        .await
        .unwrap();
    assert_eq!(body, b"<rss/>");
}

#[tokio::test]
async fn fetch_rejects_non_success_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(&test_config()).unwrap();
    let err = fetcher
        .fetch(&format!("{}/missing", server.uri()), 1024)
        .await
        .unwrap_err();
    match err {
        AggregatorError::FetchStatus { status, .. } => assert_eq!(status, 404),
        other => panic!("expected FetchStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn fetch_aborts_past_the_byte_cap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/huge"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(&test_config()).unwrap();
    let err = fetcher
        .fetch(&format!("{}/huge", server.uri()), 1024)
        .await
        .unwrap_err();
    assert!(matches!(err, AggregatorError::ResponseTooLarge { .. }));
}

#[tokio::test]
async fn fetch_times_out_on_slow_servers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(std::time::Duration::from_secs(5))
                .set_body_bytes(b"late".to_vec()),
        )
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(&test_config()).unwrap();
    let err = fetcher
        .fetch(&format!("{}/slow", server.uri()), 1024)
        .await
        .unwrap_err();
    assert!(matches!(err, AggregatorError::FetchTimeout { .. }));
}

#[tokio::test]
async fn unshortener_follows_redirect_chain() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/short"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("Location", "/hop"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hop"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", format!("{}/article", server.uri()).as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/article"))
        .respond_with(ResponseTemplate::new(200).set_body_string("the article"))
        .mount(&server)
        .await;

    let unshortener = Unshortener::new(&test_config()).unwrap();
    let canonical = unshortener
        .resolve(&format!("{}/short", server.uri()))
        .await
        .unwrap();
    assert_eq!(canonical, format!("{}/article", server.uri()));
}

#[tokio::test]
async fn unshortener_stops_at_the_hop_cap() {
    let server = MockServer::start().await;
    // A redirect loop; the resolver must bail out with the last URL.
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "/loop"),
        )
        .mount(&server)
        .await;

    let unshortener = Unshortener::new(&test_config()).unwrap();
    let resolved = unshortener
        .resolve(&format!("{}/loop", server.uri()))
        .await
        .unwrap();
    assert_eq!(resolved, format!("{}/loop", server.uri()));
}

#[tokio::test]
async fn unshortener_rejects_relative_input() {
    let unshortener = Unshortener::new(&test_config()).unwrap();
    assert!(unshortener.resolve("not-a-url").await.is_err());
}

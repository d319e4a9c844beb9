pub mod aggregator;
pub mod config;
pub mod db;
pub mod downloader;
pub mod enrich;
pub mod fetcher;
pub mod images;
pub mod object_store;
pub mod parser;
pub mod processor;
pub mod profanity;
pub mod publisher;
pub mod rank;
pub mod types;
pub mod unshorten;

pub use aggregator::Aggregator;
pub use config::Config;
pub use db::Db;
pub use fetcher::Fetcher;
pub use publisher::{load_publishers, Publisher};
pub use types::*;

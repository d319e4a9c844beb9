use crate::processor::strip_html;
use crate::types::{sha256_hex, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

fn default_max_entries() -> usize {
    20
}

fn default_content_type() -> String {
    "article".to_string()
}

/// Publisher record from the catalog JSON. Immutable during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publisher {
    #[serde(default)]
    pub publisher_id: String,
    pub publisher_name: String,
    pub site_url: String,
    pub feed_url: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub og_images: bool,
    #[serde(default)]
    pub creative_instance_id: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub destination_domains: Vec<String>,
    /// Feed URL before a migration, if any. The publisher id stays pinned
    /// to it so the identity survives feed moves.
    #[serde(default)]
    pub original_feed: Option<String>,
}

impl Publisher {
    /// Trim and sanitize every string field, then derive `publisher_id`
    /// from the original-or-current feed URL when the catalog left it out.
    pub fn normalize(&mut self) {
        for field in [
            &mut self.publisher_name,
            &mut self.site_url,
            &mut self.feed_url,
            &mut self.category,
            &mut self.creative_instance_id,
            &mut self.content_type,
        ] {
            *field = strip_html(field.trim());
        }
        self.channels = self
            .channels
            .iter()
            .map(|c| strip_html(c.trim()))
            .filter(|c| !c.is_empty())
            .collect();

        if self.publisher_id.is_empty() {
            let id_source = self.original_feed.as_deref().unwrap_or(&self.feed_url);
            self.publisher_id = sha256_hex(id_source);
        }
    }
}

/// Load the publisher catalog, dropping disabled entries. Keyed by
/// `publisher_id` for the rest of the run.
pub fn load_publishers(path: &Path) -> Result<HashMap<String, Publisher>> {
    let raw = std::fs::read_to_string(path)?;
    let mut publishers: Vec<Publisher> = serde_json::from_str(&raw)?;

    let total = publishers.len();
    let mut by_id = HashMap::new();
    for publisher in publishers.iter_mut() {
        publisher.normalize();
        if !publisher.enabled {
            continue;
        }
        by_id.insert(publisher.publisher_id.clone(), publisher.clone());
    }

    info!(
        "Loaded {} enabled publishers out of {} from {}",
        by_id.len(),
        total,
        path.display()
    );
    Ok(by_id)
}

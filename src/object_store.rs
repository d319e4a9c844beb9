use crate::config::Config;
use crate::types::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Content-addressed upload sink. Keys are stable for stable content, so
/// concurrent or repeated puts of the same object are idempotent.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Filesystem-backed store laid out as `{root}/{bucket}/{key}`. Stands in
/// for the real S3 sink in local runs and tests.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.root.join(bucket).join(key);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("Object already stored, skipping: {}/{}", bucket, key);
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        info!("Stored {}/{} ({} bytes)", bucket, key, bytes.len());
        Ok(())
    }
}

/// Discards everything; used when `no_upload` is set.
pub struct NoopObjectStore;

#[async_trait]
impl ObjectStore for NoopObjectStore {
    async fn put(&self, bucket: &str, key: &str, _bytes: &[u8]) -> Result<()> {
        debug!("Upload disabled, dropping {}/{}", bucket, key);
        Ok(())
    }
}

pub fn from_config(config: &Config) -> Arc<dyn ObjectStore> {
    if config.no_upload {
        Arc::new(NoopObjectStore)
    } else {
        Arc::new(FsObjectStore::new(config.output_path.join("s3")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_put_is_idempotent() {
        let root = std::env::temp_dir().join(format!("news-store-{}", uuid::Uuid::new_v4()));
        let store = FsObjectStore::new(root.clone());

        store.put("bucket", "a/b/object.png", b"first").await.unwrap();
        // A second put of the same key leaves the original content alone.
        store.put("bucket", "a/b/object.png", b"second").await.unwrap();

        let stored = tokio::fs::read(root.join("bucket/a/b/object.png"))
            .await
            .unwrap();
        assert_eq!(stored, b"first");

        tokio::fs::remove_dir_all(root).await.unwrap();
    }

    #[tokio::test]
    async fn noop_store_accepts_everything() {
        NoopObjectStore.put("any", "key", b"bytes").await.unwrap();
    }
}

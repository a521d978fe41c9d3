//! Object storage backends for the tensor store.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::prefix::PrefixStore;
use object_store::ObjectStore;
use tracing::{debug, instrument};

use crate::error::{Result, StoreError};

/// The minimal object storage the store needs.
///
/// `put` must replace the whole object atomically: readers see either the
/// previous or the new content, never a mix. Manifest publication relies on
/// it.
#[async_trait]
pub trait StoreBackend: Send + Sync + fmt::Debug {
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Read an object; `None` if it does not exist.
    async fn get(&self, path: &str) -> Result<Option<Bytes>>;

    /// Paths of all objects under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Delete every object under `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let paths = self.list(prefix).await?;
        for path in &paths {
            self.delete(path).await?;
        }
        Ok(paths.len())
    }

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// [`StoreBackend`] over any `object_store` implementation.
#[derive(Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    description: String,
}

impl fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("location", &self.description)
            .finish()
    }
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>, description: impl Into<String>) -> Self {
        Self {
            store,
            description: description.into(),
        }
    }

    /// In-memory backend, mainly for tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory://")
    }

    /// Local directory backend. The directory is created if needed.
    pub fn local(root: impl AsRef<std::path::Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| StoreError::Backend {
            path: root.display().to_string(),
            message: format!("Failed to create store directory: {}", e),
            transient: false,
        })?;
        let store = LocalFileSystem::new_with_prefix(root)
            .map_err(|e| StoreError::backend(&root.display().to_string(), e))?;
        Ok(Self::new(Arc::new(store), root.display().to_string()))
    }

    /// Select a backend from a store URL.
    ///
    /// - `memory://`
    /// - `file:///path` or a plain path
    /// - `s3://bucket[/prefix]`, credentials and endpoint from `AWS_*`
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("memory://") {
            return Ok(Self::in_memory());
        }

        if let Some(rest) = url.strip_prefix("s3://") {
            let (bucket, prefix) = match rest.split_once('/') {
                Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
                None => (rest, ""),
            };
            if bucket.is_empty() {
                return Err(StoreError::config(format!("missing bucket in {}", url)));
            }

            let s3 = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .build()
                .map_err(|e| StoreError::config(format!("Failed to create S3 client: {}", e)))?;

            let store: Arc<dyn ObjectStore> = if prefix.is_empty() {
                Arc::new(s3)
            } else {
                Arc::new(PrefixStore::new(s3, prefix))
            };
            return Ok(Self::new(store, url));
        }

        let path = url.strip_prefix("file://").unwrap_or(url);
        if path.is_empty() || (url.contains("://") && !url.starts_with("file://")) {
            return Err(StoreError::config(format!("unsupported store URL '{}'", url)));
        }
        Self::local(path)
    }
}

#[async_trait]
impl StoreBackend for ObjectStoreBackend {
    #[instrument(skip(self, data), fields(path = %path))]
    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        debug!(size = data.len(), "Writing object");
        self.store
            .put(&Path::from(path), data.into())
            .await
            .map_err(|e| StoreError::backend(path, e))?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        let result = match self.store.get(&Path::from(path)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(StoreError::backend(path, e)),
        };
        let bytes = result
            .bytes()
            .await
            .map_err(|e| StoreError::backend(path, e))?;
        Ok(Some(bytes))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix_path = Path::from(prefix);
        let mut paths = Vec::new();

        let mut stream = self.store.list(Some(&prefix_path));
        loop {
            match stream.try_next().await {
                Ok(Some(meta)) => paths.push(meta.location.to_string()),
                Ok(None) => break,
                // A missing local directory lists as empty
                Err(object_store::Error::NotFound { .. }) => break,
                Err(e) => return Err(StoreError::backend(prefix, e)),
            }
        }

        paths.sort();
        Ok(paths)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn delete(&self, path: &str) -> Result<()> {
        match self.store.delete(&Path::from(path)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(StoreError::backend(path, e)),
        }
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::{ObjectStore, path::Path};

use crate::store::{StoreError, StoreResult};

/// Blob deletion seam consumed by the orchestrator
///
/// Used only by blob-owning hard-delete entity types. Blob deletion runs
/// before document deletion so a crash leaves an orphaned document, never
/// an orphaned-but-undiscoverable blob.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Delete every object under the prefix; returns the number removed
    async fn delete_prefix(&self, prefix: &str) -> StoreResult<usize>;
}

/// `object_store`-backed blob store
pub struct ObjectBlobStore {
    inner: Arc<dyn ObjectStore>,
}

impl ObjectBlobStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    /// Upload a blob; seeding helper for tests and demos
    pub async fn put(&self, location: &str, bytes: Vec<u8>) -> StoreResult<()> {
        let path = Path::from(location);
        self.inner
            .put(&path, bytes.into())
            .await
            .map_err(blob_error)?;
        Ok(())
    }

    /// Count objects under a prefix without touching them
    pub async fn count_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let path = Path::from(prefix);
        let mut listing = self.inner.list(Some(&path));
        let mut count = 0usize;
        while listing.try_next().await.map_err(blob_error)?.is_some() {
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn delete_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let path = Path::from(prefix);
        let mut listing = self.inner.list(Some(&path));
        let mut removed = 0usize;

        while let Some(meta) = listing.try_next().await.map_err(blob_error)? {
            match self.inner.delete(&meta.location).await {
                Ok(()) => removed += 1,
                // A concurrent delete already won; the object is gone either way
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(blob_error(e)),
            }
        }

        log::debug!("deleted {removed} blobs under prefix {prefix}");
        Ok(removed)
    }
}

/// Object store failures are network-shaped and treated as transient
fn blob_error(error: object_store::Error) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

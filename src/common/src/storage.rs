use anyhow::Result;
use object_store::{ObjectStore, local::LocalFileSystem, memory::InMemory};
use std::sync::Arc;
use url::Url;

use crate::config::BlobConfig;

/// Create an object store from blob storage configuration
pub fn create_object_store(blob_config: &BlobConfig) -> Result<Arc<dyn ObjectStore>> {
    create_object_store_from_dsn(&blob_config.dsn)
}

/// Create an object store from a DSN string
///
/// Supported schemes: `memory://` and `file:///path/to/storage`.
pub fn create_object_store_from_dsn(dsn: &str) -> Result<Arc<dyn ObjectStore>> {
    let url =
        Url::parse(dsn).map_err(|e| anyhow::anyhow!("Invalid blob storage DSN '{}': {}", dsn, e))?;

    match url.scheme() {
        "file" => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(anyhow::anyhow!(
                    "File DSN must specify a path: file:///path/to/storage"
                ));
            }
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        scheme => Err(anyhow::anyhow!(
            "Unsupported blob storage scheme: {}. Supported: file, memory",
            scheme
        )),
    }
}

mod error;
mod hash;
mod retry;
mod traits;

pub mod filesystem;
#[cfg(feature = "object-storage")]
pub mod s3;

use std::path::PathBuf;
use std::sync::Arc;

pub use error::StorageError;
pub use filesystem::FilesystemContentStore;
pub use hash::ContentHash;
pub use retry::RetryingContentStore;
pub use traits::{BlobSource, BoxReader, ContentStore, hashed};

use crate::config::{StorageBackend, StorageConfig};

/// Build the configured content store, wrapped in the retry layer.
pub async fn build_content_store(
    config: &StorageConfig,
) -> Result<Arc<dyn ContentStore>, StorageError> {
    match config.backend {
        StorageBackend::Filesystem => {
            let store = FilesystemContentStore::new(PathBuf::from(&config.root)).await?;
            Ok(Arc::new(RetryingContentStore::new(store)))
        }
        #[cfg(feature = "object-storage")]
        StorageBackend::S3 => {
            let store = s3::S3ContentStore::new(config)?;
            Ok(Arc::new(RetryingContentStore::new(store)))
        }
        #[cfg(not(feature = "object-storage"))]
        StorageBackend::S3 => Err(StorageError::Config(
            "built without the object-storage feature".into(),
        )),
    }
}

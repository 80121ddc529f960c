use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::debug;

use super::error::StorageError;
use super::hash::ContentHash;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// A rewindable byte source.
///
/// Every upload attempt re-opens the source from the start, so a failed
/// attempt never leaves a retry reading from the middle of a stream.
#[derive(Debug, Clone)]
pub enum BlobSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

impl BlobSource {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(Arc::from(data.into()))
    }

    /// Open a fresh reader positioned at offset 0.
    pub async fn open(&self) -> Result<BoxReader, StorageError> {
        match self {
            Self::Path(path) => {
                let file = tokio::fs::File::open(path).await?;
                Ok(Box::new(BufReader::new(file)))
            }
            Self::Bytes(data) => Ok(Box::new(Cursor::new(data.clone()))),
        }
    }

    pub async fn len(&self) -> Result<u64, StorageError> {
        match self {
            Self::Path(path) => Ok(tokio::fs::metadata(path).await?.len()),
            Self::Bytes(data) => Ok(data.len() as u64),
        }
    }

    pub async fn read_all(&self) -> Result<Vec<u8>, StorageError> {
        let mut reader = self.open().await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

/// Flat key/value object storage keyed by content hash.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store the bytes of `source` at `key`, silently overwriting.
    async fn upload(&self, source: &BlobSource, key: &ContentHash) -> Result<(), StorageError>;

    /// Best-effort presence check. May return `false` for a present object,
    /// never `true` for an absent one.
    async fn exists(&self, key: &ContentHash) -> Result<bool, StorageError>;

    /// Anonymous, time-limited read URL for `key`.
    async fn presigned_read(&self, key: &ContentHash, ttl: Duration)
    -> Result<String, StorageError>;

    /// Read an object back in full.
    async fn get(&self, key: &ContentHash) -> Result<Vec<u8>, StorageError>;

    /// Human-readable name of the bucket or container, used in audit events.
    fn store_identifier(&self) -> String;
}

/// Hash `source`, upload it under its digest unless already present, and
/// return the digest.
pub async fn hashed(
    store: &dyn ContentStore,
    source: &BlobSource,
) -> Result<ContentHash, StorageError> {
    let (hash, len) = ContentHash::compute_stream(source.open().await?).await?;
    if store.exists(&hash).await? {
        debug!(key = %hash, len, "object already present, skipping upload");
        return Ok(hash);
    }
    store.upload(source, &hash).await?;
    debug!(key = %hash, len, "object uploaded");
    Ok(hash)
}

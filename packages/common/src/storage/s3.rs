use std::time::Duration;

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use tracing::debug;

use super::error::StorageError;
use super::hash::ContentHash;
use super::traits::{BlobSource, ContentStore};
use crate::config::StorageConfig;

/// S3-compatible object store (AWS, MinIO, Azure behind an S3 gateway).
pub struct S3ContentStore {
    bucket: Box<Bucket>,
    name: String,
}

impl S3ContentStore {
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let region = match &config.endpoint {
            Some(endpoint) => Region::Custom {
                region: config.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => config
                .region
                .parse()
                .map_err(|e| StorageError::Config(format!("region: {e}")))?,
        };
        let credentials = Credentials::new(
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Config(format!("credentials: {e}")))?;

        let mut bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        if config.path_style {
            bucket = bucket.with_path_style();
        }
        Ok(Self {
            bucket,
            name: config.bucket.clone(),
        })
    }
}

fn backend(err: S3Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn is_not_found(err: &S3Error) -> bool {
    matches!(err, S3Error::HttpFailWithBody(404, _))
}

#[async_trait]
impl ContentStore for S3ContentStore {
    async fn upload(&self, source: &BlobSource, key: &ContentHash) -> Result<(), StorageError> {
        let mut reader = source.open().await?;
        let response = self
            .bucket
            .put_object_stream(&mut reader, key.to_hex())
            .await
            .map_err(backend)?;
        let code = response.status_code();
        if !(200..300).contains(&code) {
            return Err(StorageError::Backend(format!("upload returned {code}")));
        }
        debug!(key = %key, bytes = response.uploaded_bytes(), "uploaded object");
        Ok(())
    }

    async fn exists(&self, key: &ContentHash) -> Result<bool, StorageError> {
        match self.bucket.head_object(key.to_hex()).await {
            Ok((_, 200..=299)) => Ok(true),
            Ok((_, 404)) => Ok(false),
            Ok((_, code)) => Err(StorageError::Backend(format!("head returned {code}"))),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(backend(e)),
        }
    }

    async fn presigned_read(
        &self,
        key: &ContentHash,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        // S3 caps presigned URLs at seven days
        let secs = ttl.as_secs().clamp(1, 7 * 24 * 3600) as u32;
        self.bucket
            .presign_get(key.to_hex(), secs, None)
            .await
            .map_err(backend)
    }

    async fn get(&self, key: &ContentHash) -> Result<Vec<u8>, StorageError> {
        match self.bucket.get_object(key.to_hex()).await {
            Ok(response) if response.status_code() == 404 => {
                Err(StorageError::NotFound(key.to_hex()))
            }
            Ok(response) if (200..300).contains(&response.status_code()) => {
                Ok(response.bytes().to_vec())
            }
            Ok(response) => Err(StorageError::Backend(format!(
                "get returned {}",
                response.status_code()
            ))),
            Err(e) if is_not_found(&e) => Err(StorageError::NotFound(key.to_hex())),
            Err(e) => Err(backend(e)),
        }
    }

    fn store_identifier(&self) -> String {
        format!("s3://{}", self.name)
    }
}

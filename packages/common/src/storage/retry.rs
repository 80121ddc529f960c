use std::time::Duration;

use async_trait::async_trait;

use super::error::StorageError;
use super::hash::ContentHash;
use super::traits::{BlobSource, ContentStore};
use crate::retry::{ExponentialBackoff, RetryError, retry};

/// Wraps a content store so every call is retried with exponential backoff
/// for up to two minutes.
///
/// Uploads re-open the source on every attempt. Retrying an upload is always
/// safe since keys are content hashes.
pub struct RetryingContentStore<S> {
    inner: S,
    policy: ExponentialBackoff,
}

impl<S: ContentStore> RetryingContentStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            policy: ExponentialBackoff::for_storage(),
        }
    }

    pub fn with_policy(inner: S, policy: ExponentialBackoff) -> Self {
        Self { inner, policy }
    }
}

fn classify(err: StorageError) -> RetryError<StorageError> {
    if err.is_transient() {
        RetryError::Transient(err)
    } else {
        RetryError::Permanent(err)
    }
}

#[async_trait]
impl<S: ContentStore> ContentStore for RetryingContentStore<S> {
    async fn upload(&self, source: &BlobSource, key: &ContentHash) -> Result<(), StorageError> {
        let mut policy = self.policy.clone();
        let inner = &self.inner;
        retry(&mut policy, move |_| async move {
            inner.upload(source, key).await.map_err(classify)
        })
        .await
    }

    async fn exists(&self, key: &ContentHash) -> Result<bool, StorageError> {
        let mut policy = self.policy.clone();
        let inner = &self.inner;
        retry(&mut policy, move |_| async move {
            inner.exists(key).await.map_err(classify)
        })
        .await
    }

    async fn presigned_read(
        &self,
        key: &ContentHash,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let mut policy = self.policy.clone();
        let inner = &self.inner;
        retry(&mut policy, move |_| async move {
            inner.presigned_read(key, ttl).await.map_err(classify)
        })
        .await
    }

    async fn get(&self, key: &ContentHash) -> Result<Vec<u8>, StorageError> {
        let mut policy = self.policy.clone();
        let inner = &self.inner;
        retry(&mut policy, move |_| async move {
            inner.get(key).await.map_err(classify)
        })
        .await
    }

    fn store_identifier(&self) -> String {
        self.inner.store_identifier()
    }
}

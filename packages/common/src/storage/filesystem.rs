use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::error::StorageError;
use super::hash::ContentHash;
use super::traits::{BlobSource, ContentStore};

/// Filesystem-backed content store for local runs and tests.
///
/// Objects are laid out Git-style: `{root}/{first 2 hex chars}/{remaining 62}`.
/// "Presigned" URLs are plain `file://` URLs; the TTL is not enforced.
pub struct FilesystemContentStore {
    root: PathBuf,
}

impl FilesystemContentStore {
    pub async fn new(root: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(root.join(".tmp")).await?;
        let root = fs::canonicalize(&root).await?;
        Ok(Self { root })
    }

    fn object_path(&self, key: &ContentHash) -> PathBuf {
        let (dir, file) = key.shard();
        self.root.join(dir).join(file)
    }

    fn temp_path(&self) -> PathBuf {
        self.root
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl ContentStore for FilesystemContentStore {
    async fn upload(&self, source: &BlobSource, key: &ContentHash) -> Result<(), StorageError> {
        let temp_path = self.temp_path();
        let mut reader = source.open().await?;
        let mut temp_file = fs::File::create(&temp_path).await?;

        if let Err(e) = tokio::io::copy(&mut reader, &mut temp_file).await {
            drop(temp_file);
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        temp_file.flush().await?;
        drop(temp_file);

        let object_path = self.object_path(key);
        if let Some(parent) = object_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // rename is atomic, so concurrent writers of the same key race benignly
        if let Err(e) = fs::rename(&temp_path, &object_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn exists(&self, key: &ContentHash) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.object_path(key)).await?)
    }

    async fn presigned_read(
        &self,
        key: &ContentHash,
        _ttl: Duration,
    ) -> Result<String, StorageError> {
        let path = self.object_path(key);
        if !fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(key.to_hex()));
        }
        Ok(format!("file://{}", path.display()))
    }

    async fn get(&self, key: &ContentHash) -> Result<Vec<u8>, StorageError> {
        match fs::read(self.object_path(key)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_hex()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn store_identifier(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

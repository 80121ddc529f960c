//! Download and unpack the inputs of an evaluation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use common::retry::{ExponentialBackoff, RetryError, retry};
use flate2::read::GzDecoder;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::engine::EvalError;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("unsupported URL scheme: {0}")]
    Unsupported(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to unpack {path}: {reason}")]
    Archive { path: PathBuf, reason: String },
}

impl FetchError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Request { .. } => true,
            Self::Status { status, .. } => {
                *status >= 500
                    || *status == StatusCode::REQUEST_TIMEOUT.as_u16()
                    || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            _ => false,
        }
    }
}

impl From<FetchError> for EvalError {
    fn from(e: FetchError) -> Self {
        EvalError::Fatal(e.to_string())
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `url` to `dest`, replacing anything already there.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError>;
}

/// Fetches `http(s)://` URLs (typically presigned object-store URLs) and
/// `file://` URLs.
pub struct HttpFetcher {
    client: Client,
    policy: ExponentialBackoff,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Request {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            policy: ExponentialBackoff::for_storage(),
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        let request_error = |e: reqwest::Error| FetchError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let mut response = self.client.get(url).send().await.map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = response.chunk().await.map_err(request_error)? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self, dest))]
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        if let Some(path) = url.strip_prefix("file://") {
            tokio::fs::copy(path, dest).await?;
            return Ok(());
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            let scheme = url.split_once("://").map_or(url, |(s, _)| s);
            return Err(FetchError::Unsupported(scheme.to_string()));
        }

        let mut policy = self.policy.clone();
        retry(&mut policy, move |_| async move {
            self.download(url, dest).await.map_err(|e| {
                if e.is_transient() {
                    RetryError::Transient(e)
                } else {
                    RetryError::Permanent(e)
                }
            })
        })
        .await?;
        debug!("fetched");
        Ok(())
    }
}

/// Unpack a gzipped tarball into `dest`.
pub async fn extract_tarball(archive: &Path, dest: &Path) -> Result<(), FetchError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let archive_error = |reason: String| FetchError::Archive {
            path: archive.clone(),
            reason,
        };
        std::fs::create_dir_all(&dest)?;
        let file = std::fs::File::open(&archive)?;
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        tar.set_preserve_permissions(true);
        tar.unpack(&dest).map_err(|e| archive_error(e.to_string()))
    })
    .await
    .map_err(|e| FetchError::Io(std::io::Error::other(e)))?
}

/// Descend into `dir` while it contains exactly one entry and that entry is a
/// directory.
pub async fn single_root(dir: &Path) -> Result<PathBuf, FetchError> {
    let mut current = dir.to_path_buf();
    loop {
        let mut entries = tokio::fs::read_dir(&current).await?;
        let Some(first) = entries.next_entry().await? else {
            return Ok(current);
        };
        if entries.next_entry().await?.is_some() || !first.file_type().await?.is_dir() {
            return Ok(current);
        }
        current = first.path();
    }
}

/// Fetch a tarball into `scratch/<name>.tar.gz` and unpack it to
/// `scratch/<name>`. Returns the unpacked directory.
pub async fn fetch_tree(
    fetcher: &dyn Fetcher,
    url: &str,
    scratch: &Path,
    name: &str,
) -> Result<PathBuf, FetchError> {
    let archive = scratch.join(format!("{name}.tar.gz"));
    let dest = scratch.join(name);
    fetcher.fetch(url, &archive).await?;
    extract_tarball(&archive, &dest).await?;
    tokio::fs::remove_file(&archive).await?;
    Ok(dest)
}

//! Persistence of serializable state: a local JSON file and a cloud blob.
//!
//! # Design
//! `LocalStore` writes each save to its own uniquely named temporary file in
//! the target directory and renames it into place, so a crash mid-write leaves
//! the previous file intact and overlapping saves never share a temp file.
//! `CloudStore` treats the blob as one JSON document: `pull` is a GET through
//! the fetch coordinator, `push` a PUT of the whole value.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::coordinator::FetchCoordinator;
use crate::decode::{decode, Decoder, JsonDecoder};
use crate::error::{FetchError, RequestError};
use crate::http::{HttpMethod, RequestDescriptor, DEFAULT_TIMEOUT};
use crate::retry::RetryPolicy;
use crate::transport::{HttpTransport, Transport};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),

    /// The local file exists but does not hold a valid document.
    #[error("corrupt file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("no cloud location configured")]
    NotConfigured,
}

/// A JSON document on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and decode the file. A missing or empty file is `Ok(None)`.
    pub async fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        decode(&bytes).map(Some).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    pub async fn save<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| self.io_error(source))?;
                parent.to_path_buf()
            }
            None => PathBuf::from("."),
        };

        let len = bytes.len();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_replacing(&dir, &path, &bytes))
            .await
            .map_err(|err| self.io_error(io::Error::other(err)))?
            .map_err(|source| self.io_error(source))?;

        debug!(path = %self.path.display(), bytes = len, "saved local state");
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Write `bytes` to a fresh temp file in `dir`, then rename it over `path`.
/// The temp file is removed if any step fails.
fn write_replacing(dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// A JSON document stored as a single block blob behind an HTTP URL.
#[derive(Debug, Clone)]
pub struct CloudStore<T = HttpTransport, D = JsonDecoder> {
    url: Url,
    coordinator: FetchCoordinator<T, D>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl<T: Transport, D: Decoder> CloudStore<T, D> {
    pub fn new(url: &str, coordinator: FetchCoordinator<T, D>) -> Result<Self, StoreError> {
        let url = Url::parse(url).map_err(|source| RequestError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(Self {
            url,
            coordinator,
            policy: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Download and decode the blob. A 404 means nothing was stored yet.
    pub async fn pull<V: DeserializeOwned>(&self) -> Result<Option<V>, StoreError> {
        let request = RequestDescriptor::from_url(HttpMethod::Get, self.url.clone())
            .header("accept", "application/json")
            .timeout(self.timeout);
        match self.coordinator.fetch(&request, &self.policy).await {
            Ok(value) => Ok(Some(value)),
            Err(FetchError::Status { code: 404, .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Replace the blob with `value`.
    pub async fn push<V: Serialize + ?Sized>(&self, value: &V) -> Result<(), StoreError> {
        let request = RequestDescriptor::from_url(HttpMethod::Put, self.url.clone())
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", "2019-12-12")
            .timeout(self.timeout)
            .json_body(value)?;
        let response = self.coordinator.execute(&request, &self.policy).await?;
        debug!(status = response.status, url = %self.url, "pushed blob");
        Ok(())
    }
}

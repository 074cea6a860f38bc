//! Backend trait and the closed set of built-in backends.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};

use super::filesystem::FilesystemBackend;
use super::http::HttpBackend;
use super::memory::MemoryBackend;

/// Error types for backend operations.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Object not found")]
    NotFound,

    #[error("Operation not implemented by this backend")]
    NotImplemented,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Other(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// A stored object as reported by [`Backend::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Full object key.
    pub path: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Remote object store.
///
/// Objects are opaque byte streams addressed by `/`-separated keys. Transfers
/// stream in both directions; no backend may buffer a whole object unless it
/// is itself an in-memory store.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Streams the object stored under `key` into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotFound`] if there is no such object.
    async fn get(&self, key: &str, dst: &mut (dyn AsyncWrite + Send + Unpin)) -> BackendResult<()>;

    /// Stores everything read from `src` under `key`, replacing any previous object.
    ///
    /// A read error from `src` must fail the put and leave no partial object behind.
    async fn put(&self, key: &str, src: Box<dyn AsyncRead + Send + Sync + Unpin>)
        -> BackendResult<()>;

    /// Checks if an object exists. A missing object is `Ok(false)`, not an error.
    async fn exists(&self, key: &str) -> BackendResult<bool>;

    /// Lists objects whose key starts with `prefix`.
    ///
    /// Backends without listing support keep the default, which returns
    /// [`BackendError::NotImplemented`].
    async fn list(&self, _prefix: &str) -> BackendResult<Vec<FileEntry>> {
        Err(BackendError::NotImplemented)
    }

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Backend selection as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Filesystem {
        root: PathBuf,
    },
    Http {
        url: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default = "default_max_retries")]
        max_retries: u32,
    },
    Memory,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Filesystem {
            root: PathBuf::from(".cairn"),
        }
    }
}

/// One of the built-in backends, chosen once at configuration time.
pub enum BackendKind {
    Filesystem(FilesystemBackend),
    Http(HttpBackend),
    Memory(MemoryBackend),
}

impl BackendKind {
    /// Builds the backend described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the backend cannot be initialised, e.g. the
    /// storage directory cannot be created or the URL is invalid.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let backend = match config {
            BackendConfig::Filesystem { root } => {
                BackendKind::Filesystem(FilesystemBackend::new(root).map_err(config_error)?)
            }
            BackendConfig::Http {
                url,
                token,
                max_retries,
            } => BackendKind::Http(
                HttpBackend::new(url, token.clone())
                    .map_err(config_error)?
                    .with_max_retries(*max_retries),
            ),
            BackendConfig::Memory => BackendKind::Memory(MemoryBackend::new()),
        };
        Ok(backend)
    }

    fn inner(&self) -> &dyn Backend {
        match self {
            BackendKind::Filesystem(backend) => backend,
            BackendKind::Http(backend) => backend,
            BackendKind::Memory(backend) => backend,
        }
    }
}

fn config_error(e: BackendError) -> Error {
    Error::Config(format!("Failed to initialise backend: {}", e))
}

#[async_trait]
impl Backend for BackendKind {
    async fn get(&self, key: &str, dst: &mut (dyn AsyncWrite + Send + Unpin)) -> BackendResult<()> {
        self.inner().get(key, dst).await
    }

    async fn put(
        &self,
        key: &str,
        src: Box<dyn AsyncRead + Send + Sync + Unpin>,
    ) -> BackendResult<()> {
        self.inner().put(key, src).await
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        self.inner().exists(key).await
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<FileEntry>> {
        self.inner().list(prefix).await
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }
}

/// Splits a key into validated path segments.
///
/// Leading and trailing `/` are ignored; empty, `.` and `..` segments are rejected.
pub fn key_segments(key: &str) -> BackendResult<Vec<&str>> {
    let trimmed = key.trim_matches('/');
    if trimmed.is_empty() {
        return Err(BackendError::InvalidKey("key is empty".to_string()));
    }

    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments
        .iter()
        .any(|s| s.is_empty() || *s == "." || *s == ".." || s.contains('\\'))
    {
        return Err(BackendError::InvalidKey(key.to_string()));
    }
    Ok(segments)
}

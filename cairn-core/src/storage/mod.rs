//! Storage façade over a remote [`Backend`].
//!
//! Every backend call runs under one configurable deadline. A call that runs
//! out of time yields [`Error::Timeout`]; anything the backend reports yields
//! [`Error::Backend`] tagged with the operation and key.

mod backend;
mod filesystem;
mod http;
mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::{Error, Result};

pub use self::backend::{
    key_segments, Backend, BackendConfig, BackendError, BackendKind, BackendResult, FileEntry,
};
pub use self::filesystem::FilesystemBackend;
pub use self::http::HttpBackend;
pub use self::memory::MemoryBackend;

/// Default deadline for a single backend operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(180);

/// A backend with a per-operation timeout.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn Backend>,
    timeout: Duration,
}

impl Storage {
    pub fn new(backend: Arc<dyn Backend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Builds the configured backend.
    pub fn from_config(config: &BackendConfig, timeout: Duration) -> Result<Self> {
        let backend = BackendKind::from_config(config)?;
        Ok(Self::new(Arc::new(backend), timeout))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Streams the object under `key` into `dst`.
    pub async fn get(&self, key: &str, dst: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<()> {
        self.bounded("get", key, self.backend.get(key, dst)).await
    }

    /// Stores everything read from `src` under `key`.
    pub async fn put(&self, key: &str, src: Box<dyn AsyncRead + Send + Sync + Unpin>) -> Result<()> {
        self.bounded("put", key, self.backend.put(key, src)).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.bounded("exists", key, self.backend.exists(key)).await
    }

    /// Lists objects under `prefix`.
    ///
    /// Check [`Error::is_not_implemented`] to detect backends without listing.
    pub async fn list(&self, prefix: &str) -> Result<Vec<FileEntry>> {
        self.bounded("list", prefix, self.backend.list(prefix)).await
    }

    async fn bounded<T, F>(&self, operation: &'static str, key: &str, call: F) -> Result<T>
    where
        F: Future<Output = BackendResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(Error::Backend {
                operation,
                key: key.to_string(),
                source,
            }),
            Err(_) => {
                debug!(operation, key, timeout = ?self.timeout, "backend operation timed out");
                Err(Error::Timeout {
                    operation,
                    key: key.to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

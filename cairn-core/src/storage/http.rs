//! HTTP backend speaking the `cairn-server` object protocol.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode, Url};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::sleep;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::backend::{key_segments, Backend, BackendError, BackendResult, FileEntry};

const OBJECTS_PATH: [&str; 2] = ["v1", "objects"];

/// HTTP backend.
///
/// Uploads and downloads stream in both directions. Only `exists` and `list`
/// are retried with exponential backoff; a streamed body cannot be replayed.
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    token: Option<String>,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpBackend {
    /// Creates a new HTTP backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(url: &str, token: Option<String>) -> BackendResult<Self> {
        let base_url = Url::parse(url)
            .map_err(|e| BackendError::Other(format!("Invalid backend URL {}: {}", url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::Other(format!(
                "Backend URL {} cannot be used as a base",
                url
            )));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BackendError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token,
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Gets the URL for an object. Each key segment is percent-encoded separately.
    fn object_url(&self, key: &str) -> BackendResult<Url> {
        let segments = key_segments(key)?;
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Other("Backend URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(OBJECTS_PATH)
            .extend(segments);
        Ok(url)
    }

    fn list_url(&self, prefix: &str) -> BackendResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Other("Backend URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(OBJECTS_PATH);
        url.query_pairs_mut()
            .append_pair("prefix", prefix.trim_matches('/'));
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Retries an operation with exponential backoff.
    async fn retry<F, Fut, T>(&self, mut f: F) -> BackendResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = BackendResult<T>> + Send,
        T: Send,
    {
        let mut delay = self.retry_delay;
        let mut attempt = 0;

        loop {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    debug!(attempt, error = %e, "retrying request");
                    sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_retryable(error: &BackendError) -> bool {
    matches!(error, BackendError::Network(_))
}

fn network(e: reqwest::Error) -> BackendError {
    BackendError::Network(e.to_string())
}

/// Maps an unsuccessful response onto a backend error.
async fn failure(operation: &str, response: Response) -> BackendError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => BackendError::NotFound,
        StatusCode::NOT_IMPLEMENTED | StatusCode::METHOD_NOT_ALLOWED => BackendError::NotImplemented,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BackendError::Authentication(format!("{} returned {}", operation, status))
        }
        StatusCode::BAD_REQUEST => BackendError::InvalidKey(text),
        s if s.is_server_error() => {
            BackendError::Network(format!("{} failed with status {}: {}", operation, s, text))
        }
        s => BackendError::InvalidResponse(format!(
            "{} failed with status {}: {}",
            operation, s, text
        )),
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn get(&self, key: &str, dst: &mut (dyn AsyncWrite + Send + Unpin)) -> BackendResult<()> {
        let url = self.object_url(key)?;
        let mut response = self.request(Method::GET, url).send().await.map_err(network)?;
        if !response.status().is_success() {
            return Err(failure("download", response).await);
        }

        let mut received = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(network)? {
            dst.write_all(&chunk).await?;
            received += chunk.len() as u64;
        }
        dst.flush().await?;

        debug!(key, bytes = received, "object downloaded");
        Ok(())
    }

    async fn put(
        &self,
        key: &str,
        src: Box<dyn AsyncRead + Send + Sync + Unpin>,
    ) -> BackendResult<()> {
        let url = self.object_url(key)?;
        let body = Body::wrap_stream(ReaderStream::new(src));

        let response = self
            .request(Method::PUT, url)
            .body(body)
            .send()
            .await
            .map_err(network)?;

        if response.status().is_success() {
            debug!(key, "object uploaded");
            Ok(())
        } else {
            Err(failure("upload", response).await)
        }
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        let url = self.object_url(key)?;
        self.retry(|| {
            let request = self.request(Method::HEAD, url.clone());
            async move {
                let response = request.send().await.map_err(network)?;
                match response.status() {
                    status if status.is_success() => Ok(true),
                    StatusCode::NOT_FOUND => Ok(false),
                    _ => Err(failure("exists check", response).await),
                }
            }
        })
        .await
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<FileEntry>> {
        let url = self.list_url(prefix)?;
        self.retry(|| {
            let request = self.request(Method::GET, url.clone());
            async move {
                let response = request.send().await.map_err(network)?;
                if !response.status().is_success() {
                    return Err(failure("list", response).await);
                }
                let body = response.bytes().await.map_err(network)?;
                serde_json::from_slice::<Vec<FileEntry>>(&body)
                    .map_err(|e| BackendError::InvalidResponse(format!("list body: {}", e)))
            }
        })
        .await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

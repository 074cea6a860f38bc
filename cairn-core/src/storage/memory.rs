//! In-process backend for tests and dry runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::backend::{key_segments, Backend, BackendError, BackendResult, FileEntry};

#[derive(Debug, Clone)]
struct Object {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// Objects held in a concurrent map.
#[derive(Debug)]
pub struct MemoryBackend {
    objects: DashMap<String, Object>,
    puts: AtomicUsize,
    listing: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            objects: DashMap::new(),
            puts: AtomicUsize::new(0),
            listing: AtomicBool::new(true),
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose `list` reports [`BackendError::NotImplemented`].
    pub fn without_listing() -> Self {
        let backend = Self::default();
        backend.listing.store(false, Ordering::Relaxed);
        backend
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        self.objects.insert(
            key.into(),
            Object {
                data,
                last_modified: Utc::now(),
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.get(key).map(|o| o.data.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn normalize(key: &str) -> BackendResult<String> {
        Ok(key_segments(key)?.join("/"))
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &str, dst: &mut (dyn AsyncWrite + Send + Unpin)) -> BackendResult<()> {
        let key = Self::normalize(key)?;
        // Clone out so no map guard is held across an await.
        let data = self
            .objects
            .get(&key)
            .map(|o| o.data.clone())
            .ok_or(BackendError::NotFound)?;

        dst.write_all(&data).await?;
        dst.flush().await?;
        Ok(())
    }

    async fn put(
        &self,
        key: &str,
        mut src: Box<dyn AsyncRead + Send + Sync + Unpin>,
    ) -> BackendResult<()> {
        let key = Self::normalize(key)?;
        let mut data = Vec::new();
        src.read_to_end(&mut data).await?;

        self.insert(key, data);
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        let key = Self::normalize(key)?;
        Ok(self.objects.contains_key(&key))
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<FileEntry>> {
        if !self.listing.load(Ordering::Relaxed) {
            return Err(BackendError::NotImplemented);
        }

        let prefix = prefix.trim_matches('/');
        let nested = format!("{}/", prefix);
        let mut entries: Vec<FileEntry> = self
            .objects
            .iter()
            .filter(|item| {
                let key = item.key().as_str();
                prefix.is_empty() || key == prefix || key.starts_with(&nested)
            })
            .map(|item| FileEntry {
                path: item.key().clone(),
                size: item.value().data.len() as u64,
                last_modified: item.value().last_modified,
            })
            .collect();

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

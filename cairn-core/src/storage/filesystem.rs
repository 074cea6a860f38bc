//! Filesystem backend.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempPath;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

use super::backend::{key_segments, Backend, BackendError, BackendResult, FileEntry};
use crate::path_utils::to_slash;

const TEMP_SUFFIX: &str = ".tmp";

/// Stores each object as a file under a root directory.
///
/// The key's segments become directories. Writes land in a uniquely named
/// temp file next to the target and are renamed into place once complete, so
/// readers never observe a partial object.
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Creates the backend, creating `root` if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(root: impl AsRef<Path>) -> BackendResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> BackendResult<PathBuf> {
        let mut path = self.root.clone();
        for segment in key_segments(key)? {
            path.push(segment);
        }
        Ok(path)
    }

    fn temp_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.{}{}", name, Uuid::new_v4(), TEMP_SUFFIX))
    }

    /// Writes `src` to `temp_path`, then renames it to `path`.
    ///
    /// The temp file is removed when the write fails or the future is dropped
    /// before the rename, e.g. by an operation timeout.
    async fn write_object(
        path: &Path,
        temp_path: &Path,
        src: &mut (dyn AsyncRead + Send + Sync + Unpin),
    ) -> io::Result<u64> {
        let guard = TempPath::from_path(temp_path);
        let mut file = fs::File::create(temp_path).await?;

        let written = tokio::io::copy(src, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(temp_path, path).await?;
        guard.keep().map_err(|e| e.error)?;
        Ok(written)
    }
}

fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

#[async_trait]
impl Backend for FilesystemBackend {
    async fn get(&self, key: &str, dst: &mut (dyn AsyncWrite + Send + Unpin)) -> BackendResult<()> {
        let path = self.object_path(key)?;
        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(BackendError::NotFound),
            Err(e) => return Err(e.into()),
        };

        let copied = tokio::io::copy(&mut file, dst).await?;
        dst.flush().await?;
        debug!(key, bytes = copied, "object read");
        Ok(())
    }

    async fn put(
        &self,
        key: &str,
        mut src: Box<dyn AsyncRead + Send + Sync + Unpin>,
    ) -> BackendResult<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = Self::temp_path(&path);
        let written = Self::write_object(&path, &temp_path, src.as_mut()).await?;
        debug!(key, bytes = written, "object stored");
        Ok(())
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        let path = self.object_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<FileEntry>> {
        let start = if prefix.trim_matches('/').is_empty() {
            self.root.clone()
        } else {
            self.object_path(prefix)?
        };
        let root = self.root.clone();

        tokio::task::spawn_blocking(move || list_files(&root, &start))
            .await
            .map_err(|e| BackendError::Other(format!("listing task failed: {}", e)))?
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}

fn list_files(root: &Path, start: &Path) -> BackendResult<Vec<FileEntry>> {
    if !start.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(start).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() || is_temp_file(&entry.file_name().to_string_lossy()) {
            continue;
        }

        let meta = entry.metadata().map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| BackendError::Other(e.to_string()))?;

        entries.push(FileEntry {
            path: to_slash(rel),
            size: meta.len(),
            last_modified: meta.modified().map(DateTime::<Utc>::from)?,
        });
    }
    Ok(entries)
}

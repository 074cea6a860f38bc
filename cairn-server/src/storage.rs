//! Object storage on the local filesystem with atomic uploads.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use cairn_core::path_utils::to_slash;
use cairn_core::storage::{key_segments, FileEntry};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use walkdir::WalkDir;

const OBJECTS_DIR: &str = "objects";
const TMP_DIR: &str = "tmp";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Object not found")]
    NotFound,

    #[error("Object exceeds maximum size of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Upload stream failed: {0}")]
    Stream(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Stores objects under `<root>/objects/<key>`.
///
/// Uploads are written to `<root>/tmp/<uuid>.tmp` and renamed into place
/// once complete, so a download never observes a partial object.
pub struct ObjectStore {
    root: PathBuf,
    max_object_size: u64,
}

impl ObjectStore {
    /// Creates the store, creating its directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn new(root: impl AsRef<Path>, max_object_size: u64) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        fs::create_dir_all(root.join(TMP_DIR))?;

        Ok(Self {
            root,
            max_object_size,
        })
    }

    pub fn max_object_size(&self) -> u64 {
        self.max_object_size
    }

    /// Maps a key onto its file. Absolute keys and keys with empty, `.` or
    /// `..` segments are rejected.
    fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        if key.starts_with('/') {
            return Err(StoreError::InvalidKey(format!("{} is absolute", key)));
        }
        let segments = key_segments(key).map_err(|e| StoreError::InvalidKey(e.to_string()))?;

        let mut path = self.root.join(OBJECTS_DIR);
        path.extend(segments);
        Ok(path)
    }

    fn temp_path(&self) -> PathBuf {
        self.root
            .join(TMP_DIR)
            .join(format!("{}.tmp", uuid::Uuid::new_v4()))
    }

    /// Returns the size of the object under `key`, if it exists.
    pub async fn size(&self, key: &str) -> StoreResult<Option<u64>> {
        let path = self.object_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Opens the object under `key` for streaming.
    pub async fn open(&self, key: &str) -> StoreResult<(tokio::fs::File, u64)> {
        let path = self.object_path(key)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(e.into()),
        };

        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(StoreError::NotFound);
        }
        Ok((file, meta.len()))
    }

    /// Streams `body` into the object under `key`, replacing any previous object.
    ///
    /// Returns the number of bytes stored.
    pub async fn store<S, B, E>(&self, key: &str, body: S) -> StoreResult<u64>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let path = self.object_path(key)?;
        let temp_path = self.temp_path();

        match self.write_temp(&temp_path, body).await {
            Ok(written) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
                    remove_temp(&temp_path).await;
                    return Err(e.into());
                }
                debug!(key, bytes = written, "object stored");
                Ok(written)
            }
            Err(e) => {
                remove_temp(&temp_path).await;
                Err(e)
            }
        }
    }

    async fn write_temp<S, B, E>(&self, temp_path: &Path, mut body: S) -> StoreResult<u64>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let mut file = tokio::fs::File::create(temp_path).await?;
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StoreError::Stream(e.to_string()))?;
            let chunk = chunk.as_ref();
            written += chunk.len() as u64;
            if written > self.max_object_size {
                return Err(StoreError::TooLarge {
                    limit: self.max_object_size,
                });
            }
            file.write_all(chunk).await?;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    /// Lists objects under `prefix`, sorted by key.
    pub async fn list(&self, prefix: &str) -> StoreResult<Vec<FileEntry>> {
        let objects = self.root.join(OBJECTS_DIR);
        let start = if prefix.trim_matches('/').is_empty() {
            objects.clone()
        } else {
            self.object_path(prefix.trim_matches('/'))?
        };

        tokio::task::spawn_blocking(move || list_objects(&objects, &start))
            .await
            .map_err(|e| StoreError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?
    }

    /// Removes temp files left behind by interrupted uploads.
    ///
    /// Returns the number of files removed.
    pub fn cleanup_temp_files(&self) -> StoreResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(self.root.join(TMP_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("tmp") {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale temp file"),
            }
        }
        Ok(removed)
    }
}

async fn remove_temp(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove temp file");
        }
    }
}

fn list_objects(objects: &Path, start: &Path) -> StoreResult<Vec<FileEntry>> {
    if !start.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(start).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let meta = entry.metadata().map_err(io::Error::from)?;
        let Ok(rel) = entry.path().strip_prefix(objects) else {
            continue;
        };
        entries.push(FileEntry {
            path: to_slash(rel),
            size: meta.len(),
            last_modified: DateTime::<Utc>::from(meta.modified()?),
        });
    }
    Ok(entries)
}

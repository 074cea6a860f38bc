//! Upload direction: archives each mount and streams it into storage.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::archive::Archive;
use crate::error::{Error, Result};
use crate::key::{GeneratedKey, KeyChain};
use crate::path_utils::{escapes_root, object_key};
use crate::storage::Storage;
use crate::streaming::{pipe, settle, Counting, DEFAULT_PIPE_CAPACITY};
use crate::worker::WorkerPool;

/// Archives mounts and uploads them under `namespace/key/mount`.
///
/// The key is resolved once per call. Every mount then gets its own worker in
/// which the archive codec writes into a bounded pipe that the storage upload
/// drains, so no archive is ever held in memory. A failing mount never stops
/// its siblings; all failures come back as one combined error.
pub struct Rebuilder {
    storage: Storage,
    archive: Arc<dyn Archive>,
    keys: Arc<KeyChain>,
    namespace: String,
    override_existing: bool,
    skip_symlinks: bool,
    max_concurrency: Option<usize>,
}

impl Rebuilder {
    pub fn new(
        storage: Storage,
        archive: Arc<dyn Archive>,
        keys: Arc<KeyChain>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            archive,
            keys,
            namespace: namespace.into(),
            override_existing: true,
            skip_symlinks: false,
            max_concurrency: None,
        }
    }

    /// When disabled, mounts whose object already exists are skipped.
    pub fn override_existing(mut self, enabled: bool) -> Self {
        self.override_existing = enabled;
        self
    }

    pub fn skip_symlinks(mut self, enabled: bool) -> Self {
        self.skip_symlinks = enabled;
        self
    }

    /// Caps the number of mounts uploaded at once. `None` means no cap.
    pub fn max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit;
        self
    }

    /// Archives and uploads every mount.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Operation`] wrapping either the key generation failure
    /// or the combined per-mount errors.
    pub async fn rebuild(&self, mounts: &[String]) -> Result<()> {
        let result = match self.keys.generate(&[]) {
            Ok(key) => self.run(&key, mounts).await,
            Err(e) => Err(e),
        };
        result.map_err(operation_failed)
    }

    /// Archives and uploads every mount under an already resolved key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Operation`] wrapping the combined per-mount errors.
    pub async fn rebuild_with_key(&self, key: &GeneratedKey, mounts: &[String]) -> Result<()> {
        self.run(key, mounts).await.map_err(operation_failed)
    }

    async fn run(&self, key: &GeneratedKey, mounts: &[String]) -> Result<()> {
        info!(key = %key.value, source = ?key.source, mounts = mounts.len(), "rebuilding cache");

        let mut pool = WorkerPool::new(self.max_concurrency);

        for mount in mounts {
            if escapes_root(Path::new(mount)) {
                pool.fail(mount, Error::Config(format!("mount {} points outside the root", mount)));
                continue;
            }

            let source = self.archive.root().join(mount);
            if let Err(e) = tokio::fs::symlink_metadata(&source).await {
                pool.fail(mount, Error::SourceNotReachable { path: source, source: e });
                continue;
            }

            let object = object_key(&self.namespace, &key.value, mount);
            if !self.override_existing {
                match self.storage.exists(&object).await {
                    Ok(true) => {
                        info!(mount = %mount, object = %object, "object already exists, skipping upload");
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        pool.fail(mount, e);
                        continue;
                    }
                }
            }

            let upload = Upload {
                storage: self.storage.clone(),
                archive: Arc::clone(&self.archive),
                mount: mount.clone(),
                object,
                skip_symlinks: self.skip_symlinks,
            };
            pool.spawn(mount.clone(), upload.run());
        }

        pool.join().await
    }
}

fn operation_failed(source: Error) -> Error {
    Error::Operation {
        operation: "rebuild",
        source: Box::new(source),
    }
}

/// One mount's archive→upload pipeline.
struct Upload {
    storage: Storage,
    archive: Arc<dyn Archive>,
    mount: String,
    object: String,
    skip_symlinks: bool,
}

impl Upload {
    async fn run(self) -> Result<()> {
        let (writer, reader) = pipe(DEFAULT_PIPE_CAPACITY);

        let archive = Arc::clone(&self.archive);
        let sources = vec![PathBuf::from(&self.mount)];
        let skip_symlinks = self.skip_symlinks;
        let producer = tokio::task::spawn_blocking(move || {
            let mut writer = writer;
            let result = archive.create(&sources, &mut writer, skip_symlinks);
            match &result {
                Ok(_) => drop(writer),
                Err(e) => writer.close_with_error(&io::Error::new(io::ErrorKind::Other, e.to_string())),
            }
            result
        });

        let upload = Counting::new(reader);
        let uploaded = upload.counter();
        let put = self.storage.put(&self.object, Box::new(upload)).await;
        let created = producer
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))
            .and_then(|result| result);

        let (raw, ()) = settle(created, put)?;
        let archived = uploaded.get();
        let ratio = if raw == 0 { 0.0 } else { archived as f64 / raw as f64 };
        info!(
            mount = %self.mount,
            object = %self.object,
            raw_bytes = raw,
            archived_bytes = archived,
            ratio = %format!("{:.2}", ratio),
            "mount uploaded"
        );
        debug!(backend = self.storage.backend_name(), "upload complete");
        Ok(())
    }
}

//! Download direction: streams stored objects into the archive extractor.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::archive::Archive;
use crate::error::{Error, Result};
use crate::key::{GeneratedKey, KeyChain};
use crate::path_utils::{escapes_root, object_key, object_prefix};
use crate::storage::{FileEntry, Storage};
use crate::streaming::{pipe, settle, DEFAULT_PIPE_CAPACITY};
use crate::worker::WorkerPool;

/// Downloads objects stored under `namespace/key` and extracts them.
///
/// Mirrors [`Rebuilder`](crate::rebuild::Rebuilder): one worker per
/// destination, the download writing into a bounded pipe that the extractor
/// reads on a blocking thread.
pub struct Restorer {
    storage: Storage,
    archive: Arc<dyn Archive>,
    keys: Arc<KeyChain>,
    namespace: String,
    mounts: Vec<String>,
    fail_if_key_not_present: bool,
    max_concurrency: Option<usize>,
}

impl Restorer {
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
            mounts: Vec::new(),
            fail_if_key_not_present: false,
            max_concurrency: None,
        }
    }

    /// Mounts restored when no destinations are given and the backend cannot list.
    pub fn with_mounts(mut self, mounts: Vec<String>) -> Self {
        self.mounts = mounts;
        self
    }

    pub fn fail_if_key_not_present(mut self, enabled: bool) -> Self {
        self.fail_if_key_not_present = enabled;
        self
    }

    pub fn max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit;
        self
    }

    /// Restores `dsts`, or everything stored under the key when `dsts` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Operation`] wrapping the key generation failure,
    /// [`Error::KeyNotPresent`] or the combined per-destination errors.
    pub async fn restore(&self, dsts: &[String]) -> Result<()> {
        let result = match self.keys.generate(&[]) {
            Ok(key) => self.run(&key, dsts).await,
            Err(e) => Err(e),
        };
        result.map_err(operation_failed)
    }

    /// Restores `dsts` under an already resolved key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Operation`] wrapping [`Error::KeyNotPresent`] or the
    /// combined per-destination errors.
    pub async fn restore_with_key(&self, key: &GeneratedKey, dsts: &[String]) -> Result<()> {
        self.run(key, dsts).await.map_err(operation_failed)
    }

    async fn run(&self, key: &GeneratedKey, dsts: &[String]) -> Result<()> {
        let prefix = object_prefix(&self.namespace, &key.value);
        info!(key = %key.value, source = ?key.source, "restoring cache");

        let dsts = if dsts.is_empty() {
            self.discover(&prefix).await?
        } else {
            if self.fail_if_key_not_present {
                self.ensure_present(&prefix, &key.value, dsts).await?;
            }
            dsts.to_vec()
        };

        let mut pool = WorkerPool::new(self.max_concurrency);
        for dst in dsts {
            if escapes_root(Path::new(&dst)) {
                pool.fail(&dst, Error::Config(format!("mount {} points outside the root", dst)));
                continue;
            }

            let download = Download {
                storage: self.storage.clone(),
                archive: Arc::clone(&self.archive),
                object: object_key(&self.namespace, &key.value, &dst),
                dst: dst.clone(),
            };
            pool.spawn(dst, download.run());
        }

        pool.join().await
    }

    /// Lists the objects under `prefix` and maps them back to destinations.
    async fn discover(&self, prefix: &str) -> Result<Vec<String>> {
        let dsts = match self.storage.list(prefix).await {
            Ok(entries) => destinations(prefix, &entries),
            Err(e) if e.is_not_implemented() => {
                warn!(
                    backend = self.storage.backend_name(),
                    "backend cannot list objects, restoring configured mounts"
                );
                self.mounts.clone()
            }
            Err(e) => return Err(e),
        };

        if dsts.is_empty() && self.fail_if_key_not_present {
            return Err(Error::KeyNotPresent {
                prefix: prefix.to_string(),
            });
        }
        debug!(prefix, count = dsts.len(), "destinations resolved");
        Ok(dsts)
    }

    async fn ensure_present(&self, prefix: &str, key: &str, dsts: &[String]) -> Result<()> {
        for dst in dsts {
            if self.storage.exists(&object_key(&self.namespace, key, dst)).await? {
                return Ok(());
            }
        }
        Err(Error::KeyNotPresent {
            prefix: prefix.to_string(),
        })
    }
}

fn operation_failed(source: Error) -> Error {
    Error::Operation {
        operation: "restore",
        source: Box::new(source),
    }
}

/// Strips `prefix/` from each listed path; the object stored at the prefix itself maps to `"."`.
fn destinations(prefix: &str, entries: &[FileEntry]) -> Vec<String> {
    let mut dsts: Vec<String> = entries
        .iter()
        .filter_map(|entry| {
            let path = entry.path.trim_start_matches('/');
            if path == prefix {
                return Some(".".to_string());
            }
            path.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('/'))
                .filter(|rest| !rest.is_empty())
                .map(str::to_string)
        })
        .collect();
    dsts.sort();
    dsts.dedup();
    dsts
}

/// One destination's download→extract pipeline.
struct Download {
    storage: Storage,
    archive: Arc<dyn Archive>,
    object: String,
    dst: String,
}

impl Download {
    async fn run(self) -> Result<()> {
        let (mut writer, reader) = pipe(DEFAULT_PIPE_CAPACITY);

        let archive = Arc::clone(&self.archive);
        let dst = PathBuf::from(&self.dst);
        let consumer = tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let result = archive.extract(&dst, &mut reader);
            match &result {
                Ok(_) => {
                    // The tar reader stops at the end-of-archive marker; trailing
                    // padding must still be consumed or the download sees a closed pipe.
                    if let Err(e) = io::copy(&mut reader, &mut io::sink()) {
                        debug!(error = %e, "stream ended with error after extraction");
                    }
                }
                Err(e) => reader.close_with_error(&io::Error::new(io::ErrorKind::Other, e.to_string())),
            }
            result
        });

        let get = self.storage.get(&self.object, &mut writer).await;
        match &get {
            Ok(()) => drop(writer),
            Err(e) => writer.close_with_error(&io::Error::new(io::ErrorKind::Other, e.to_string())),
        }
        let extracted = consumer
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))
            .and_then(|result| result);

        let ((), written) = settle(get, extracted)?;
        info!(dst = %self.dst, object = %self.object, bytes = written, "mount restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(path: &str) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            size: 1,
            last_modified: Utc::now(),
        }
    }

    #[test]
    fn test_destinations_strip_prefix() {
        let entries = vec![
            entry("repo/abc/node_modules"),
            entry("repo/abc/.cargo/registry"),
            entry("repo/abc"),
            entry("repo/abcdef/other"),
        ];

        assert_eq!(
            destinations("repo/abc", &entries),
            vec![".", ".cargo/registry", "node_modules"]
        );
    }

    #[test]
    fn test_destinations_empty_listing() {
        assert!(destinations("repo/abc", &[]).is_empty());
    }
}

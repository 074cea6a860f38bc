//! High-level cache entry point combining storage, archive codec and key chain.

use std::sync::Arc;

use tracing::debug;

use crate::archive::{self, Archive};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::key::{GeneratedKey, KeyChain, Metadata};
use crate::rebuild::Rebuilder;
use crate::restore::Restorer;
use crate::storage::Storage;

/// Build cache orchestrator.
///
/// Owns one [`Rebuilder`] and one [`Restorer`] sharing the same storage,
/// archive codec and key chain.
pub struct Cache {
    rebuilder: Rebuilder,
    restorer: Restorer,
    keys: Arc<KeyChain>,
    backend: &'static str,
    mounts: Vec<String>,
}

impl Cache {
    /// Creates a cache from already built parts, using default transfer settings.
    pub fn new(
        storage: Storage,
        archive: Arc<dyn Archive>,
        keys: KeyChain,
        namespace: impl Into<String>,
        mounts: Vec<String>,
    ) -> Self {
        let namespace = namespace.into();
        let keys = Arc::new(keys);
        let backend = storage.backend_name();

        let rebuilder = Rebuilder::new(
            storage.clone(),
            Arc::clone(&archive),
            Arc::clone(&keys),
            namespace.clone(),
        );
        let restorer = Restorer::new(storage, archive, Arc::clone(&keys), namespace)
            .with_mounts(mounts.clone());

        Self {
            rebuilder,
            restorer,
            keys,
            backend,
            mounts,
        }
    }

    /// Creates a cache from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the backend cannot
    /// be created.
    pub fn from_config(config: &CacheConfig, metadata: Metadata) -> Result<Self> {
        config.validate()?;

        let storage = Storage::from_config(&config.backend, config.operation_timeout())?;
        let archive = archive::from_format(
            config.archive.format,
            &config.root,
            config.archive.compression_level,
        )?;
        let keys = Arc::new(config.key_chain(metadata));
        keys.check()?;

        debug!(
            backend = storage.backend_name(),
            format = config.archive.format.as_str(),
            root = %config.root.display(),
            "cache configured"
        );

        let transfer = &config.transfer;
        let rebuilder = Rebuilder::new(
            storage.clone(),
            Arc::clone(&archive),
            Arc::clone(&keys),
            config.namespace.clone(),
        )
        .override_existing(transfer.override_existing)
        .skip_symlinks(config.archive.skip_symlinks)
        .max_concurrency(transfer.max_concurrency);

        let backend = storage.backend_name();
        let restorer = Restorer::new(storage, archive, Arc::clone(&keys), config.namespace.clone())
            .with_mounts(config.mounts.clone())
            .fail_if_key_not_present(transfer.fail_if_key_not_present)
            .max_concurrency(transfer.max_concurrency);

        Ok(Self {
            rebuilder,
            restorer,
            keys,
            backend,
            mounts: config.mounts.clone(),
        })
    }

    /// Resolves the cache key the next rebuild or restore would use.
    pub fn key(&self) -> Result<GeneratedKey> {
        self.keys.generate(&[])
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend
    }

    pub fn mounts(&self) -> &[String] {
        &self.mounts
    }

    pub fn rebuilder(&self) -> &Rebuilder {
        &self.rebuilder
    }

    pub fn restorer(&self) -> &Restorer {
        &self.restorer
    }

    /// Archives and uploads `mounts`, or the configured mounts when empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if there is nothing to rebuild, otherwise the
    /// combined rebuild error.
    pub async fn rebuild(&self, mounts: &[String]) -> Result<()> {
        self.rebuilder.rebuild(self.rebuild_mounts(mounts)?).await
    }

    /// Like [`Cache::rebuild`], but uploads under an already generated key.
    ///
    /// # Errors
    ///
    /// Same as [`Cache::rebuild`].
    pub async fn rebuild_with_key(&self, key: &GeneratedKey, mounts: &[String]) -> Result<()> {
        self.rebuilder
            .rebuild_with_key(key, self.rebuild_mounts(mounts)?)
            .await
    }

    fn rebuild_mounts<'a>(&'a self, mounts: &'a [String]) -> Result<&'a [String]> {
        let mounts = if mounts.is_empty() { &self.mounts[..] } else { mounts };
        if mounts.is_empty() {
            return Err(Error::Config("no mounts to rebuild".to_string()));
        }
        Ok(mounts)
    }

    /// Restores `mounts`, or everything stored under the key when empty.
    ///
    /// # Errors
    ///
    /// Returns the combined restore error.
    pub async fn restore(&self, mounts: &[String]) -> Result<()> {
        self.restorer.restore(mounts).await
    }

    /// Like [`Cache::restore`], but fetches under an already generated key.
    ///
    /// # Errors
    ///
    /// Same as [`Cache::restore`].
    pub async fn restore_with_key(&self, key: &GeneratedKey, mounts: &[String]) -> Result<()> {
        self.restorer.restore_with_key(key, mounts).await
    }
}

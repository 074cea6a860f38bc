//! TOML configuration for a cache run, as read from `cairn.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::archive::{self, ArchiveFormat, DEFAULT_COMPRESSION_LEVEL};
use crate::error::{Error, Result};
use crate::key::{FunctionMap, HashKey, KeyChain, KeyGenerator, Metadata, StaticKey, TemplateKey};
use crate::path_utils::escapes_root;
use crate::storage::BackendConfig;

const DEFAULT_TIMEOUT_SECS: u64 = 180;

/// Cache configuration as defined in `cairn.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Prefix scoping every object of this project, usually the repository name.
    pub namespace: String,
    /// Directory relative mounts are resolved against.
    pub root: PathBuf,
    /// Paths to cache.
    pub mounts: Vec<String>,
    pub archive: ArchiveSettings,
    pub key: KeySettings,
    pub transfer: TransferSettings,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveSettings {
    pub format: ArchiveFormat,
    /// `-1` selects the codec's default level.
    pub compression_level: i32,
    pub skip_symlinks: bool,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            format: ArchiveFormat::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            skip_symlinks: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeySettings {
    /// Key template, e.g. `{{ .Repo.Name }}-{{ checksum "Cargo.lock" }}`.
    pub template: Option<String>,
    /// Extra parts hashed into the key when no template is set.
    pub parts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransferSettings {
    /// Upload even when an object already exists under the key.
    pub override_existing: bool,
    /// Fail a restore when nothing is stored under the key.
    pub fail_if_key_not_present: bool,
    pub operation_timeout_secs: u64,
    /// Maximum number of mounts transferred at once. Unset means no limit.
    pub max_concurrency: Option<usize>,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            override_existing: true,
            fail_if_key_not_present: false,
            operation_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_concurrency: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            root: PathBuf::from("."),
            mounts: Vec::new(),
            archive: ArchiveSettings::default(),
            key: KeySettings::default(),
            transfer: TransferSettings::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|error| Error::Toml {
            error,
            context: path.display().to_string(),
        })
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer.operation_timeout_secs)
    }

    /// Checks the configuration without touching the network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid values and [`Error::Template`] if
    /// the key template does not parse.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim_matches('/').is_empty() {
            return Err(Error::Config("namespace must not be empty".to_string()));
        }
        if self.transfer.operation_timeout_secs == 0 {
            return Err(Error::Config(
                "transfer.operation_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(mount) = self.mounts.iter().find(|m| escapes_root(Path::new(m.as_str()))) {
            return Err(Error::Config(format!(
                "mount {} points outside the root; use an absolute path instead",
                mount
            )));
        }
        if self.transfer.max_concurrency == Some(0) {
            return Err(Error::Config(
                "transfer.max_concurrency must be greater than zero".to_string(),
            ));
        }

        archive::from_format(
            self.archive.format,
            &self.root,
            self.archive.compression_level,
        )?;

        if let Some(template) = &self.key.template {
            TemplateKey::new(
                template.clone(),
                Metadata::default(),
                FunctionMap::standard(&self.root),
            )
            .check()?;
        }

        Ok(())
    }

    /// Builds the key generators for this configuration.
    ///
    /// With a template, the template is primary and a hash of the default
    /// parts is the fallback. Without one, the hash is primary and the plain
    /// joined parts are the fallback. Default parts are `key.parts`, or the
    /// namespace and commit branch when none are configured.
    pub fn key_chain(&self, metadata: Metadata) -> KeyChain {
        let default_parts = if self.key.parts.is_empty() {
            [self.namespace.clone(), metadata.commit.branch.clone()]
                .into_iter()
                .filter(|part| !part.is_empty())
                .collect()
        } else {
            self.key.parts.clone()
        };

        match &self.key.template {
            Some(template) => {
                let primary: Box<dyn KeyGenerator> = Box::new(TemplateKey::new(
                    template.clone(),
                    metadata,
                    FunctionMap::standard(&self.root),
                ));
                KeyChain::new(primary).with_fallback(Box::new(HashKey::new(default_parts)))
            }
            None => KeyChain::new(Box::new(HashKey::new(default_parts.clone())))
                .with_fallback(Box::new(StaticKey::new(default_parts))),
        }
    }
}

/// Parses a log level name.
///
/// # Errors
///
/// Returns [`Error::Config`] for anything other than `trace`, `debug`,
/// `info`, `warn`/`warning` or `error`.
pub fn parse_log_level(level: &str) -> Result<Level> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::Config(format!(
            "Unknown log level: {}. Supported levels: trace, debug, info, warn, error",
            other
        ))),
    }
}

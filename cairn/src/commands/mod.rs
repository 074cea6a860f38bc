//! Command implementations for the CLI.

mod key;
mod transfer;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cairn_core::{ArchiveFormat, BackendConfig, CacheConfig};
use clap::Args;
use tracing::debug;

pub use key::cmd_key;
pub use transfer::{cmd_rebuild, cmd_restore};

const DEFAULT_CONFIG_FILE: &str = "cairn.toml";

/// Flags that take precedence over the configuration file.
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// Prefix for every object of this project, usually the repository name
    #[arg(long)]
    namespace: Option<String>,

    /// Directory relative mounts are resolved against
    #[arg(long)]
    root: Option<PathBuf>,

    /// tar, gzip or zstd
    #[arg(long)]
    format: Option<String>,

    #[arg(long, allow_hyphen_values = true)]
    compression_level: Option<i32>,

    #[arg(long, action)]
    skip_symlinks: bool,

    /// Key template, e.g. '{{ .Repo.Name }}-{{ checksum "Cargo.lock" }}'
    #[arg(long)]
    template: Option<String>,

    /// Store objects in this directory
    #[arg(long, conflicts_with = "url")]
    cache_dir: Option<PathBuf>,

    /// Store objects on a cairn-server at this URL
    #[arg(long)]
    url: Option<String>,

    /// Bearer token for the server
    #[arg(long, requires = "url")]
    token: Option<String>,

    /// Timeout for each backend operation, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum number of mounts transferred at once
    #[arg(short = 'j', long)]
    max_concurrency: Option<usize>,
}

impl Overrides {
    fn apply(&self, config: &mut CacheConfig) -> Result<()> {
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        if let Some(format) = &self.format {
            config.archive.format = format.parse::<ArchiveFormat>()?;
        }
        if let Some(level) = self.compression_level {
            config.archive.compression_level = level;
        }
        if self.skip_symlinks {
            config.archive.skip_symlinks = true;
        }
        if let Some(template) = &self.template {
            config.key.template = Some(template.clone());
        }
        if let Some(dir) = &self.cache_dir {
            config.backend = BackendConfig::Filesystem { root: dir.clone() };
        }
        if let Some(url) = &self.url {
            let max_retries = match &config.backend {
                BackendConfig::Http { max_retries, .. } => *max_retries,
                _ => 3,
            };
            config.backend = BackendConfig::Http {
                url: url.clone(),
                token: self.token.clone(),
                max_retries,
            };
        }
        if let Some(timeout) = self.timeout {
            config.transfer.operation_timeout_secs = timeout;
        }
        if self.max_concurrency.is_some() {
            config.transfer.max_concurrency = self.max_concurrency;
        }
        Ok(())
    }
}

/// Loads the configuration file, if any, and applies command-line overrides.
///
/// An explicitly given file must exist; the default `cairn.toml` is optional.
pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<CacheConfig> {
    let mut config = match path {
        Some(path) => CacheConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            CacheConfig::load(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => CacheConfig::default(),
    };

    overrides.apply(&mut config)?;
    config.validate()?;

    debug!(namespace = %config.namespace, backend = ?config.backend, "configuration loaded");
    Ok(config)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to create tokio runtime")
}

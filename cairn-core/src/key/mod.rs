//! Cache key generation.
//!
//! A [`KeyChain`] pairs a primary [`KeyGenerator`] with an optional fallback.
//! The key is resolved once per run, before any archiving or transfer starts.

mod hash;
mod metadata;
mod static_key;
mod template;

use tracing::{debug, warn};

use crate::error::{Error, Result};

pub use self::hash::HashKey;
pub use self::metadata::{Author, Build, Commit, Metadata, Repo};
pub use self::static_key::StaticKey;
pub use self::template::{FunctionMap, TemplateFunction, TemplateKey};

/// Produces a cache key from caller-supplied parts.
pub trait KeyGenerator: Send + Sync {
    /// Generates the key. Identical inputs always produce identical keys.
    fn generate(&self, parts: &[&str]) -> Result<String>;

    /// Validates the generator's configuration without performing any I/O.
    fn check(&self) -> Result<()>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Which generator in a [`KeyChain`] produced a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Primary,
    Fallback,
}

/// A resolved cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKey {
    pub value: String,
    pub source: KeySource,
}

/// Primary generator with an optional fallback.
pub struct KeyChain {
    primary: Box<dyn KeyGenerator>,
    fallback: Option<Box<dyn KeyGenerator>>,
}

impl KeyChain {
    pub fn new(primary: Box<dyn KeyGenerator>) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn KeyGenerator>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Generates a key with the primary generator, falling back on error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyGeneration`] carrying both causes if the primary and
    /// the fallback fail, or the primary's error if there is no fallback.
    pub fn generate(&self, parts: &[&str]) -> Result<GeneratedKey> {
        let primary_err = match self.primary.generate(parts) {
            Ok(value) => {
                debug!(generator = self.primary.name(), key = %value, "cache key generated");
                return Ok(GeneratedKey {
                    value,
                    source: KeySource::Primary,
                });
            }
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_err);
        };

        warn!(
            generator = self.primary.name(),
            fallback = fallback.name(),
            error = %primary_err,
            "key generation failed, falling back"
        );

        match fallback.generate(parts) {
            Ok(value) => Ok(GeneratedKey {
                value,
                source: KeySource::Fallback,
            }),
            Err(fallback_err) => Err(Error::KeyGeneration(format!(
                "{} generator: {}; {} fallback: {}",
                self.primary.name(),
                primary_err,
                fallback.name(),
                fallback_err
            ))),
        }
    }

    /// Checks every generator in the chain.
    pub fn check(&self) -> Result<()> {
        self.primary.check()?;
        if let Some(fallback) = &self.fallback {
            fallback.check()?;
        }
        Ok(())
    }
}

//! Error types and result aliases.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::storage::BackendError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Source not reachable: {}. Make sure the file or directory exists and is readable: {source}", path.display())]
    SourceNotReachable { path: PathBuf, source: io::Error },

    #[error("Archive not readable: {0}")]
    ArchiveNotReadable(String),

    #[error("Unsupported entry type {kind} for {}", path.display())]
    UnsupportedEntryType { path: PathBuf, kind: String },

    #[error("Archive entry {name} resolves outside of {}", root.display())]
    UnsafeEntryPath { name: String, root: PathBuf },

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Backend {operation} failed for <{key}>: {source}")]
    Backend {
        operation: &'static str,
        key: String,
        source: BackendError,
    },

    #[error("Backend {operation} for <{key}> timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        key: String,
        timeout: Duration,
    },

    #[error("No cached objects found under <{prefix}>")]
    KeyNotPresent { prefix: String },

    #[error("mount <{mount}>: {source}")]
    Transfer { mount: String, source: Box<Error> },

    #[error("{} errors occurred:{}", .0.len(), format_errors(.0))]
    Multiple(Vec<Error>),

    #[error("{operation} failed: {source}")]
    Operation {
        operation: &'static str,
        source: Box<Error>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error in {context}: {error}")]
    Toml {
        error: toml::de::Error,
        context: String,
    },

    #[error("Worker task failed: {0}")]
    TaskJoin(String),
}

fn format_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| format!("\n\t* {}", e))
        .collect::<String>()
}

impl Error {
    /// Wraps this error with the mount it was produced for.
    pub fn for_mount(self, mount: impl Into<String>) -> Self {
        Error::Transfer {
            mount: mount.into(),
            source: Box::new(self),
        }
    }

    /// Returns `true` if the backend does not support the requested operation.
    pub fn is_not_implemented(&self) -> bool {
        match self {
            Error::Backend { source, .. } => matches!(source, BackendError::NotImplemented),
            Error::Transfer { source, .. } | Error::Operation { source, .. } => {
                source.is_not_implemented()
            }
            _ => false,
        }
    }

    /// Returns `true` if the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Backend { source, .. } => matches!(source, BackendError::NotFound),
            Error::Transfer { source, .. } | Error::Operation { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::Transfer { source, .. } | Error::Operation { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    pub fn is_archive_not_readable(&self) -> bool {
        match self {
            Error::ArchiveNotReadable(_) => true,
            Error::Transfer { source, .. } | Error::Operation { source, .. } => {
                source.is_archive_not_readable()
            }
            _ => false,
        }
    }

    pub fn is_source_not_reachable(&self) -> bool {
        match self {
            Error::SourceNotReachable { .. } => true,
            Error::Transfer { source, .. } | Error::Operation { source, .. } => {
                source.is_source_not_reachable()
            }
            _ => false,
        }
    }

    /// Returns `true` if the error was caused by the other end of a pipe going away.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == io::ErrorKind::BrokenPipe,
            Error::Backend {
                source: BackendError::Io(e),
                ..
            } => e.kind() == io::ErrorKind::BrokenPipe,
            Error::Transfer { source, .. } | Error::Operation { source, .. } => {
                source.is_broken_pipe()
            }
            _ => false,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Toml {
            error,
            context: "cairn.toml".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_lists_every_error() {
        let err = Error::Multiple(vec![
            Error::KeyGeneration("first".to_string()),
            Error::Config("second".to_string()),
        ]);
        let message = err.to_string();

        assert!(message.starts_with("2 errors occurred:"));
        assert!(message.contains("first"));
        assert!(message.contains("second"));
    }

    #[test]
    fn test_classification_looks_through_context() {
        let err = Error::Backend {
            operation: "list",
            key: "ns/key".to_string(),
            source: BackendError::NotImplemented,
        }
        .for_mount("node_modules");

        assert!(err.is_not_implemented());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("node_modules"));
    }

    #[test]
    fn test_broken_pipe_detection() {
        let err = Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "reader gone"));
        assert!(err.is_broken_pipe());
        assert!(!Error::ArchiveNotReadable("bad".to_string()).is_broken_pipe());
    }
}

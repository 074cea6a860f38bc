//! Streaming archive codec for filesystem trees.
//!
//! [`TarArchive`] serializes trees into tar; [`GzipArchive`] and
//! [`ZstdArchive`] wrap it with compression framing and delegate everything
//! else. Archives are produced and consumed as streams; no tree or entry list
//! is ever held in memory.

mod gzip;
mod tar;
mod zstd;

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use self::gzip::GzipArchive;
pub use self::tar::TarArchive;
pub use self::zstd::ZstdArchive;

/// Compression level meaning "whatever the codec considers default".
pub const DEFAULT_COMPRESSION_LEVEL: i32 = -1;

/// Serializes filesystem trees into a byte stream and back.
pub trait Archive: Send + Sync {
    /// Walks every source and writes the tree into `sink`.
    ///
    /// Returns the number of regular-file payload bytes written, excluding
    /// headers and compression framing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceNotReachable`] if a source cannot be `lstat`ed and
    /// [`Error::UnsupportedEntryType`] for objects such as sockets.
    fn create(&self, sources: &[PathBuf], sink: &mut dyn Write, skip_symlinks: bool) -> Result<u64>;

    /// Reads entries from `source` until end of stream, recreating them under `dst`.
    ///
    /// Returns the number of payload bytes written to disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ArchiveNotReadable`] if the stream is corrupt or
    /// truncated and [`Error::UnsupportedEntryType`] for unknown entry types.
    fn extract(&self, dst: &Path, source: &mut dyn Read) -> Result<u64>;

    /// Directory that relative sources and destinations are resolved against.
    fn root(&self) -> &Path;
}

/// Container format of the persisted archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Tar,
    #[default]
    Gzip,
    Zstd,
}

impl ArchiveFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Gzip => "gzip",
            ArchiveFormat::Zstd => "zstd",
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tar" => Ok(ArchiveFormat::Tar),
            "gzip" | "gz" => Ok(ArchiveFormat::Gzip),
            "zstd" | "zst" => Ok(ArchiveFormat::Zstd),
            other => Err(Error::Config(format!(
                "Unknown archive format: {}. Supported formats: tar, gzip, zstd",
                other
            ))),
        }
    }
}

/// Builds the codec for `format` rooted at `root`.
///
/// # Errors
///
/// Returns an error if `compression_level` is out of range for the format.
pub fn from_format(
    format: ArchiveFormat,
    root: impl Into<PathBuf>,
    compression_level: i32,
) -> Result<Arc<dyn Archive>> {
    let tar = TarArchive::new(root);
    let archive: Arc<dyn Archive> = match format {
        ArchiveFormat::Tar => Arc::new(tar),
        ArchiveFormat::Gzip => Arc::new(GzipArchive::new(tar, compression_level)?),
        ArchiveFormat::Zstd => Arc::new(ZstdArchive::new(tar, compression_level)?),
    };
    Ok(archive)
}

/// Combines the result of an archive operation with the result of closing its
/// compressor. A close failure is reported only when nothing failed before it.
fn finish_with<T>(result: Result<T>, closed: std::io::Result<()>, codec: &str) -> Result<T> {
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(Error::Io(e)),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            tracing::warn!(codec, error = %close_err, "failed to close compressor");
            Err(e)
        }
    }
}

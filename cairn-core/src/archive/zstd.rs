use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use ::zstd::stream::read::Decoder;
use ::zstd::stream::write::Encoder;

use super::tar::TarArchive;
use super::{finish_with, Archive, DEFAULT_COMPRESSION_LEVEL};
use crate::error::{Error, Result};

const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Tar archive framed as a zstd stream.
#[derive(Debug, Clone)]
pub struct ZstdArchive {
    inner: TarArchive,
    level: i32,
}

impl ZstdArchive {
    /// Accepts `-1` or `0` for the default level, otherwise any level zstd supports.
    pub fn new(inner: TarArchive, level: i32) -> Result<Self> {
        let level = match level {
            DEFAULT_COMPRESSION_LEVEL | 0 => DEFAULT_ZSTD_LEVEL,
            other if ::zstd::compression_level_range().contains(&other) => other,
            other => {
                let range = ::zstd::compression_level_range();
                return Err(Error::Config(format!(
                    "Invalid zstd compression level {}: expected a value in {}..={}",
                    other,
                    range.start(),
                    range.end()
                )));
            }
        };
        Ok(Self { inner, level })
    }
}

impl Archive for ZstdArchive {
    fn create(&self, sources: &[PathBuf], sink: &mut dyn Write, skip_symlinks: bool) -> Result<u64> {
        let mut encoder = Encoder::new(sink, self.level)?;
        let result = self.inner.create(sources, &mut encoder, skip_symlinks);
        let closed = encoder.do_finish();
        finish_with(result, closed, "zstd")
    }

    fn extract(&self, dst: &Path, source: &mut dyn Read) -> Result<u64> {
        let mut decoder = Decoder::new(source)
            .map_err(|e| Error::ArchiveNotReadable(format!("zstd decoder: {}", e)))?;
        self.inner.extract(dst, &mut decoder)
    }

    fn root(&self) -> &Path {
        self.inner.root()
    }
}

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::tar::TarArchive;
use super::{finish_with, Archive, DEFAULT_COMPRESSION_LEVEL};
use crate::error::{Error, Result};

/// Tar archive framed as a single gzip member.
#[derive(Debug, Clone)]
pub struct GzipArchive {
    inner: TarArchive,
    level: Compression,
}

impl GzipArchive {
    /// Accepts `-1` for the default level or `0..=9`.
    pub fn new(inner: TarArchive, level: i32) -> Result<Self> {
        let level = match level {
            DEFAULT_COMPRESSION_LEVEL => Compression::default(),
            0..=9 => Compression::new(level as u32),
            other => {
                return Err(Error::Config(format!(
                    "Invalid gzip compression level {}: expected -1 or a value in 0..=9",
                    other
                )))
            }
        };
        Ok(Self { inner, level })
    }
}

impl Archive for GzipArchive {
    fn create(&self, sources: &[PathBuf], sink: &mut dyn Write, skip_symlinks: bool) -> Result<u64> {
        let mut encoder = GzEncoder::new(sink, self.level);
        let result = self.inner.create(sources, &mut encoder, skip_symlinks);
        let closed = encoder.try_finish();
        finish_with(result, closed, "gzip")
    }

    fn extract(&self, dst: &Path, source: &mut dyn Read) -> Result<u64> {
        let mut decoder = GzDecoder::new(source);
        self.inner.extract(dst, &mut decoder)
    }

    fn root(&self) -> &Path {
        self.inner.root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_level_validation() {
        assert!(GzipArchive::new(TarArchive::new("."), -1).is_ok());
        assert!(GzipArchive::new(TarArchive::new("."), 0).is_ok());
        assert!(GzipArchive::new(TarArchive::new("."), 9).is_ok());
        assert!(GzipArchive::new(TarArchive::new("."), 10).is_err());
        assert!(GzipArchive::new(TarArchive::new("."), -2).is_err());
    }

    #[test]
    fn test_round_trip_counts_payload_bytes() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("deps/sub")).unwrap();
        fs::write(src.path().join("deps/one"), b"hello, world!").unwrap();
        fs::write(src.path().join("deps/sub/two"), b"0123456789").unwrap();

        let mut compressed = Vec::new();
        let created = GzipArchive::new(TarArchive::new(src.path()), DEFAULT_COMPRESSION_LEVEL)
            .unwrap()
            .create(&[PathBuf::from("deps")], &mut compressed, false)
            .unwrap();
        assert_eq!(created, 23);
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);

        let extracted = GzipArchive::new(TarArchive::new(dst.path()), 1)
            .unwrap()
            .extract(Path::new("deps"), &mut &compressed[..])
            .unwrap();
        assert_eq!(extracted, 23);
        assert_eq!(fs::read(dst.path().join("deps/sub/two")).unwrap(), b"0123456789");
    }

    #[test]
    fn test_corrupt_input_is_not_readable() {
        let dst = TempDir::new().unwrap();
        let err = GzipArchive::new(TarArchive::new(dst.path()), DEFAULT_COMPRESSION_LEVEL)
            .unwrap()
            .extract(Path::new("deps"), &mut &b"hello\ndrone\n"[..])
            .unwrap_err();

        assert!(err.is_archive_not_readable());
    }
}

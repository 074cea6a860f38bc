//! Tar serialization of filesystem trees.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use ::tar::{Builder, EntryType, Header, HeaderMode};
use filetime::FileTime;
use tracing::{debug, trace};
use walkdir::WalkDir;

use super::Archive;
use crate::error::{Error, Result};
use crate::path_utils::{archive_name, clean, resolve_entry_target, to_slash_bytes};
use crate::streaming::Counting;

const DEFAULT_DIR_MODE: u32 = 0o755;
const NAME_FIELD_LEN: usize = 100;
const LONG_LINK_MARKER: &[u8] = b"././@LongLink";
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Plain tar codec.
///
/// Relative sources are resolved against `root` and archived under their
/// root-relative, slash-separated name. Absolute sources keep their absolute
/// name so they restore to the same place.
#[derive(Debug, Clone)]
pub struct TarArchive {
    root: PathBuf,
}

impl TarArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn archive_source<W: Write>(
        &self,
        builder: &mut Builder<W>,
        source: &Path,
        skip_symlinks: bool,
        links: &mut HardLinks,
    ) -> Result<u64> {
        let walk_root = if source.is_absolute() {
            source.to_path_buf()
        } else {
            self.root.join(source)
        };

        fs::symlink_metadata(&walk_root).map_err(|e| Error::SourceNotReachable {
            path: source.to_path_buf(),
            source: e,
        })?;

        let mut written = 0;
        let walker = WalkDir::new(&walk_root)
            .follow_links(false)
            .follow_root_links(false)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            let path = entry.path();

            let name = if source.is_absolute() {
                to_slash_bytes(&clean(path))
            } else {
                let suffix = path.strip_prefix(&walk_root).unwrap_or_else(|_| Path::new(""));
                archive_name(&source.join(suffix))
            };

            written += append_path(builder, path, &name, skip_symlinks, links)?;
        }

        Ok(written)
    }

    fn target_for(&self, dst: &Path, name: &Path) -> Result<PathBuf> {
        resolve_entry_target(&self.root, dst, name).ok_or_else(|| unsafe_entry(name, dst))
    }

    /// Resolves `name` and makes sure writing it cannot leave `base` through a
    /// symlink planted by an earlier entry.
    fn checked_target(&self, base: &Path, dst: &Path, name: &Path) -> Result<PathBuf> {
        let target = clean(&self.target_for(dst, name)?);
        if symlink_between(base, &target)? {
            return Err(unsafe_entry(name, dst));
        }
        Ok(target)
    }
}

impl Archive for TarArchive {
    fn create(&self, sources: &[PathBuf], sink: &mut dyn Write, skip_symlinks: bool) -> Result<u64> {
        let mut builder = Builder::new(sink);
        let mut links = HardLinks::default();
        let mut written = 0;

        for source in sources {
            written += self.archive_source(&mut builder, source, skip_symlinks, &mut links)?;
        }

        builder.into_inner()?;
        debug!(sources = sources.len(), written, "tar archive created");
        Ok(written)
    }

    fn extract(&self, dst: &Path, source: &mut dyn Read) -> Result<u64> {
        let mut archive = ::tar::Archive::new(source);
        let base = clean(&self.root.join(dst));
        let root = clean(&self.root);
        // The mount directory itself may be a planted symlink when it sits under the root.
        let walk_from = if base.starts_with(&root) { root } else { base.clone() };
        let mut dir_times = Vec::new();
        let mut written = 0;

        for entry in archive.entries().map_err(not_readable)? {
            let mut entry = entry.map_err(not_readable)?;
            let entry_type = entry.header().entry_type();

            if entry_type.is_pax_global_extensions() {
                continue;
            }

            let name = entry.path().map_err(not_readable)?.into_owned();
            let mode = entry.header().mode().map_err(not_readable)? & 0o7777;
            let mtime = FileTime::from_unix_time(entry.header().mtime().unwrap_or(0) as i64, 0);
            let target = self.checked_target(&walk_from, dst, &name)?;
            create_parent(&target)?;

            match entry_type {
                EntryType::Directory => {
                    unlink_symlink(&target)?;
                    create_dir(&target, mode)?;
                    dir_times.push((target, mtime));
                }
                EntryType::Regular
                | EntryType::Continuous
                | EntryType::Char
                | EntryType::Block
                | EntryType::Fifo => {
                    written += extract_file(&mut entry, &target, mode)?;
                    filetime::set_file_mtime(&target, mtime)?;
                }
                EntryType::Symlink => {
                    let link = link_name(&entry, &name)?;
                    replace_with_symlink(&link, &target)?;
                    filetime::set_symlink_file_times(&target, mtime, mtime)?;
                }
                EntryType::Link => {
                    let link = link_name(&entry, &name)?;
                    let original = self.checked_target(&walk_from, dst, &link)?;
                    if !original.starts_with(&base) {
                        return Err(unsafe_entry(&link, dst));
                    }
                    replace_with_hard_link(&original, &target)?;
                }
                other => {
                    return Err(Error::UnsupportedEntryType {
                        path: target,
                        kind: format!("{:?}", other),
                    })
                }
            }
        }

        // Children touch their parent directory, so directories are stamped last, deepest first.
        for (dir, mtime) in dir_times.iter().rev() {
            filetime::set_file_mtime(dir, *mtime)?;
        }

        debug!(dst = %dst.display(), written, "tar archive extracted");
        Ok(written)
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

/// Writes one filesystem object. Returns the payload bytes copied.
fn append_path<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    name: &[u8],
    skip_symlinks: bool,
    links: &mut HardLinks,
) -> Result<u64> {
    let meta = fs::symlink_metadata(path)?;
    let file_type = meta.file_type();

    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(&meta, HeaderMode::Complete);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        header.set_mode(meta.permissions().mode() & 0o7777);
    }

    if file_type.is_symlink() {
        if skip_symlinks {
            trace!(path = %path.display(), "skipping symlink");
            return Ok(0);
        }
        let target = fs::read_link(path)?;
        header.set_size(0);
        let link = path_bytes(&target);
        append_raw(builder, &mut header, name, Some(&*link), io::empty())?;
        return Ok(0);
    }

    if file_type.is_dir() {
        header.set_size(0);
        append_raw(builder, &mut header, name, None, io::empty())?;
        return Ok(0);
    }

    if file_type.is_file() {
        if let Some(original) = links.original(&meta, name) {
            header.set_entry_type(EntryType::Link);
            header.set_size(0);
            append_raw(
                builder,
                &mut header,
                name,
                Some(&original[..]),
                io::empty(),
            )?;
            return Ok(0);
        }

        // The header promises exactly `size` bytes; a file that shrinks while
        // being read is zero-padded, one that grows is cut off.
        let size = meta.len();
        let mut payload = Counting::new(File::open(path)?.take(size));
        let copied = payload.counter();
        let data = (&mut payload).chain(io::repeat(0)).take(size);
        append_raw(builder, &mut header, name, None, data)?;
        return Ok(copied.get());
    }

    if is_special(&meta) {
        set_device_numbers(&mut header, &meta)?;
        header.set_size(0);
        append_raw(builder, &mut header, name, None, io::empty())?;
        return Ok(0);
    }

    Err(Error::UnsupportedEntryType {
        path: path.to_path_buf(),
        kind: format!("{:?}", file_type),
    })
}

/// Appends an entry whose name is written verbatim, absolute names included.
///
/// Names and link targets longer than the header fields are preceded by GNU
/// long-name records.
fn append_raw<W: Write, R: Read>(
    builder: &mut Builder<W>,
    header: &mut Header,
    name: &[u8],
    link: Option<&[u8]>,
    data: R,
) -> io::Result<()> {
    if name.len() > NAME_FIELD_LEN {
        append_long_record(builder, EntryType::GNULongName, name)?;
    }
    fill_field(&mut header.as_old_mut().name, name);

    if let Some(link) = link {
        if link.len() > NAME_FIELD_LEN {
            append_long_record(builder, EntryType::GNULongLink, link)?;
        }
        fill_field(&mut header.as_old_mut().linkname, link);
    }

    header.set_cksum();
    builder.append(header, data)
}

fn append_long_record<W: Write>(
    builder: &mut Builder<W>,
    kind: EntryType,
    value: &[u8],
) -> io::Result<()> {
    let mut header = Header::new_gnu();
    fill_field(&mut header.as_old_mut().name, LONG_LINK_MARKER);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_size(value.len() as u64 + 1);
    header.set_entry_type(kind);
    header.set_cksum();
    builder.append(&header, value.chain(&[0u8][..]))
}

fn fill_field(field: &mut [u8; NAME_FIELD_LEN], value: &[u8]) {
    let n = value.len().min(NAME_FIELD_LEN);
    field.fill(0);
    field[..n].copy_from_slice(&value[..n]);
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    Cow::Owned(to_slash_bytes(path))
}

/// Remembers the first archived name of every multiply-linked inode.
#[derive(Default)]
struct HardLinks {
    seen: HashMap<(u64, u64), Vec<u8>>,
}

impl HardLinks {
    /// Returns the name this inode was first archived under, recording `name` if it is new.
    #[cfg(unix)]
    fn original(&mut self, meta: &fs::Metadata, name: &[u8]) -> Option<Vec<u8>> {
        use std::collections::hash_map::Entry;
        use std::os::unix::fs::MetadataExt;

        if meta.nlink() < 2 {
            return None;
        }

        match self.seen.entry((meta.dev(), meta.ino())) {
            Entry::Occupied(first) => Some(first.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(name.to_vec());
                None
            }
        }
    }

    #[cfg(not(unix))]
    fn original(&mut self, _meta: &fs::Metadata, _name: &[u8]) -> Option<Vec<u8>> {
        let _ = &self.seen;
        None
    }
}

#[cfg(unix)]
fn is_special(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    let file_type = meta.file_type();
    file_type.is_fifo() || file_type.is_char_device() || file_type.is_block_device()
}

#[cfg(not(unix))]
fn is_special(_meta: &fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn set_device_numbers(header: &mut Header, meta: &fs::Metadata) -> io::Result<()> {
    use std::os::unix::fs::{FileTypeExt, MetadataExt};

    let file_type = meta.file_type();
    if file_type.is_char_device() || file_type.is_block_device() {
        let (major, minor) = split_device(meta.rdev());
        header.set_device_major(major)?;
        header.set_device_minor(minor)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_device_numbers(_header: &mut Header, _meta: &fs::Metadata) -> io::Result<()> {
    Ok(())
}

#[cfg(target_os = "macos")]
fn split_device(rdev: u64) -> (u32, u32) {
    (((rdev >> 24) & 0xff) as u32, (rdev & 0xff_ffff) as u32)
}

#[cfg(all(unix, not(target_os = "macos")))]
fn split_device(rdev: u64) -> (u32, u32) {
    let major = ((rdev >> 8) & 0xfff) | ((rdev >> 32) & !0xfff);
    let minor = (rdev & 0xff) | ((rdev >> 12) & !0xff);
    (major as u32, minor as u32)
}

fn unsafe_entry(name: &Path, dst: &Path) -> Error {
    Error::UnsafeEntryPath {
        name: name.display().to_string(),
        root: dst.to_path_buf(),
    }
}

/// Returns `true` if an existing component strictly between `base` and the
/// final component of `target` is a symlink. Targets outside `base` are not inspected.
fn symlink_between(base: &Path, target: &Path) -> Result<bool> {
    let Ok(rel) = target.strip_prefix(base) else {
        return Ok(false);
    };

    let mut current = base.to_path_buf();
    let mut components = rel.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => return Ok(true),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(false)
}

fn not_readable(e: io::Error) -> Error {
    Error::ArchiveNotReadable(e.to_string())
}

fn link_name<R: Read>(entry: &::tar::Entry<'_, R>, name: &Path) -> Result<PathBuf> {
    entry
        .link_name()
        .map_err(not_readable)?
        .map(Cow::into_owned)
        .ok_or_else(|| {
            Error::ArchiveNotReadable(format!("link entry {} has no target", name.display()))
        })
}

fn create_parent(target: &Path) -> Result<()> {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => create_dir(parent, DEFAULT_DIR_MODE),
        _ => Ok(()),
    }
}

fn create_dir(path: &Path, mode: u32) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path)?;
    Ok(())
}

/// Removes a symlink sitting at `target` so the entry replaces it instead of writing through it.
fn unlink_symlink(target: &Path) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(target) {
        if meta.file_type().is_symlink() {
            fs::remove_file(target)?;
        }
    }
    Ok(())
}

fn extract_file<R: Read>(entry: &mut R, target: &Path, mode: u32) -> Result<u64> {
    unlink_symlink(target)?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(target)?;
    copy_payload(entry, &mut file)
}

/// Copies an entry's payload, telling stream failures apart from disk failures.
fn copy_payload<R: Read, W: Write>(src: &mut R, dst: &mut W) -> Result<u64> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = match src.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(not_readable(e)),
        };
        dst.write_all(&buffer[..n])?;
        total += n as u64;
    }

    Ok(total)
}

fn remove_existing(target: &Path) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => fs::remove_dir(target)?,
        Ok(_) => fs::remove_file(target)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn replace_with_symlink(link: &Path, target: &Path) -> Result<()> {
    remove_existing(target)?;

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(link, target)?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = link;
        Err(Error::UnsupportedEntryType {
            path: target.to_path_buf(),
            kind: "Symlink".to_string(),
        })
    }
}

fn replace_with_hard_link(original: &Path, target: &Path) -> Result<()> {
    remove_existing(target)?;
    fs::hard_link(original, target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn round_trip(src_root: &Path, dst_root: &Path, mount: &str, skip_symlinks: bool) -> (u64, u64) {
        let mut buffer = Vec::new();
        let created = TarArchive::new(src_root)
            .create(&[PathBuf::from(mount)], &mut buffer, skip_symlinks)
            .unwrap();
        let extracted = TarArchive::new(dst_root)
            .extract(Path::new(mount), &mut &buffer[..])
            .unwrap();
        (created, extracted)
    }

    #[test]
    fn test_round_trip_preserves_tree() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(src.path(), "cache/a.txt", b"hello, world!");
        write(src.path(), "cache/nested/deep/b.txt", b"0123456789");
        fs::create_dir_all(src.path().join("cache/empty")).unwrap();

        let (created, extracted) = round_trip(src.path(), dst.path(), "cache", false);

        assert_eq!(created, 23);
        assert_eq!(extracted, 23);
        assert_eq!(fs::read(dst.path().join("cache/a.txt")).unwrap(), b"hello, world!");
        assert_eq!(
            fs::read(dst.path().join("cache/nested/deep/b.txt")).unwrap(),
            b"0123456789"
        );
        assert!(dst.path().join("cache/empty").is_dir());
    }

    #[test]
    fn test_entry_names_are_root_relative() {
        let src = TempDir::new().unwrap();
        write(src.path(), "target/debug/app", b"bin");

        let mut buffer = Vec::new();
        TarArchive::new(src.path())
            .create(&[PathBuf::from("./target")], &mut buffer, false)
            .unwrap();

        let mut archive = ::tar::Archive::new(&buffer[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();

        assert_eq!(names, vec!["target", "target/debug", "target/debug/app"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_kept() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(src.path(), "cache/a.txt", b"hello, world!");
        std::os::unix::fs::symlink("a.txt", src.path().join("cache/link")).unwrap();

        let (created, _) = round_trip(src.path(), dst.path(), "cache", false);

        assert_eq!(created, 13);
        let link = dst.path().join("cache/link");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("a.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_skipped() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(src.path(), "cache/a.txt", b"hello, world!");
        write(src.path(), "elsewhere/inner.txt", b"outside");
        std::os::unix::fs::symlink("a.txt", src.path().join("cache/link")).unwrap();
        std::os::unix::fs::symlink(src.path().join("elsewhere"), src.path().join("cache/dirlink"))
            .unwrap();

        let (created, _) = round_trip(src.path(), dst.path(), "cache", true);

        assert_eq!(created, 13);
        assert!(dst.path().join("cache/a.txt").exists());
        assert!(fs::symlink_metadata(dst.path().join("cache/link")).is_err());
        assert!(fs::symlink_metadata(dst.path().join("cache/dirlink")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_symlink_is_replaced() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(src.path(), "cache/link-target", b"x");
        std::os::unix::fs::symlink("link-target", src.path().join("cache/link")).unwrap();
        write(dst.path(), "cache/link", b"stale regular file");

        round_trip(src.path(), dst.path(), "cache", false);

        assert_eq!(
            fs::read_link(dst.path().join("cache/link")).unwrap(),
            PathBuf::from("link-target")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_hard_links_restored_as_links() {
        use std::os::unix::fs::MetadataExt;

        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(src.path(), "cache/original", b"shared bytes");
        fs::hard_link(src.path().join("cache/original"), src.path().join("cache/twin")).unwrap();

        let (created, extracted) = round_trip(src.path(), dst.path(), "cache", false);

        assert_eq!(created, 12);
        assert_eq!(extracted, 12);
        let original = fs::metadata(dst.path().join("cache/original")).unwrap();
        let twin = fs::metadata(dst.path().join("cache/twin")).unwrap();
        assert_eq!(original.ino(), twin.ino());
    }

    #[test]
    fn test_absolute_source_keeps_absolute_names() {
        let src = TempDir::new().unwrap();
        let mount = src.path().join("abs-cache");
        write(&mount, "file.txt", b"absolute");

        let mut buffer = Vec::new();
        let archive = TarArchive::new("/nonexistent-root");
        archive.create(&[mount.clone()], &mut buffer, false).unwrap();

        fs::remove_dir_all(&mount).unwrap();
        archive.extract(&mount, &mut &buffer[..]).unwrap();

        assert_eq!(fs::read(mount.join("file.txt")).unwrap(), b"absolute");
    }

    #[test]
    fn test_long_names_round_trip() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let long = format!("cache/{}/{}.txt", "d".repeat(80), "f".repeat(90));
        write(src.path(), &long, b"long");

        round_trip(src.path(), dst.path(), "cache", false);

        assert_eq!(fs::read(dst.path().join(&long)).unwrap(), b"long");
    }

    #[test]
    fn test_unreachable_source() {
        let src = TempDir::new().unwrap();
        let mut buffer = Vec::new();

        let err = TarArchive::new(src.path())
            .create(&[PathBuf::from("missing")], &mut buffer, false)
            .unwrap_err();

        assert!(err.is_source_not_reachable());
    }

    #[test]
    fn test_corrupt_input_is_not_readable() {
        let dst = TempDir::new().unwrap();
        let err = TarArchive::new(dst.path())
            .extract(Path::new("cache"), &mut &b"hello\ndrone\n"[..])
            .unwrap_err();

        assert!(err.is_archive_not_readable());
    }

    #[test]
    fn test_truncated_payload_is_not_readable() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(src.path(), "cache/big", &vec![42u8; 4096]);

        let mut buffer = Vec::new();
        TarArchive::new(src.path())
            .create(&[PathBuf::from("cache")], &mut buffer, false)
            .unwrap();
        buffer.truncate(2048);

        let err = TarArchive::new(dst.path())
            .extract(Path::new("cache"), &mut &buffer[..])
            .unwrap_err();
        assert!(err.is_archive_not_readable());
    }

    fn raw_archive(entries: &[(EntryType, &str, &[u8])]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for (kind, name, data) in entries {
            let mut header = Header::new_gnu();
            header.set_entry_type(*kind);
            header.set_mode(0o644);
            header.set_size(data.len() as u64);
            append_raw(&mut builder, &mut header, name.as_bytes(), None, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_global_header_is_skipped() {
        let dst = TempDir::new().unwrap();
        let buffer = raw_archive(&[
            (EntryType::XGlobalHeader, "pax_global_header", &b"17 comment=cairn\n"[..]),
            (EntryType::Regular, "cache/file", &b"data"[..]),
        ]);

        let written = TarArchive::new(dst.path())
            .extract(Path::new("cache"), &mut &buffer[..])
            .unwrap();

        assert_eq!(written, 4);
        assert!(!dst.path().join("cache/pax_global_header").exists());
    }

    #[test]
    fn test_unknown_entry_type_aborts() {
        let dst = TempDir::new().unwrap();
        let buffer = raw_archive(&[(EntryType::new(b'Z'), "cache/odd", &b""[..])]);

        let err = TarArchive::new(dst.path())
            .extract(Path::new("cache"), &mut &buffer[..])
            .unwrap_err();

        assert!(matches!(err, Error::UnsupportedEntryType { .. }));
    }

    #[test]
    fn test_parent_segments_are_clamped_under_destination() {
        let dst = TempDir::new().unwrap();
        let buffer = raw_archive(&[(EntryType::Regular, "../../escape.txt", &b"nope"[..])]);

        TarArchive::new(dst.path().join("work"))
            .extract(Path::new("cache"), &mut &buffer[..])
            .unwrap();

        assert!(dst.path().join("work/cache/escape.txt").exists());
        assert!(!dst.path().join("escape.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_behind_planted_symlink_is_rejected() {
        let dst = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();

        let mut builder = Builder::new(Vec::new());
        let mut link = Header::new_gnu();
        link.set_entry_type(EntryType::Symlink);
        link.set_mode(0o777);
        link.set_size(0);
        let outside_name = path_bytes(outside.path());
        append_raw(&mut builder, &mut link, b"cache/link", Some(&*outside_name), io::empty()).unwrap();
        let mut file = Header::new_gnu();
        file.set_entry_type(EntryType::Regular);
        file.set_mode(0o644);
        file.set_size(5);
        append_raw(&mut builder, &mut file, b"cache/link/pwned", None, &b"pwned"[..]).unwrap();
        let buffer = builder.into_inner().unwrap();

        let err = TarArchive::new(dst.path())
            .extract(Path::new("cache"), &mut &buffer[..])
            .unwrap_err();

        assert!(matches!(err, Error::UnsafeEntryPath { .. }));
        assert!(!outside.path().join("pwned").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_behind_symlinked_mount_is_rejected() {
        let dst = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();

        let mut builder = Builder::new(Vec::new());
        let mut link = Header::new_gnu();
        link.set_entry_type(EntryType::Symlink);
        link.set_mode(0o777);
        link.set_size(0);
        let outside_name = path_bytes(outside.path());
        append_raw(&mut builder, &mut link, b"cache", Some(&*outside_name), io::empty()).unwrap();
        let mut file = Header::new_gnu();
        file.set_entry_type(EntryType::Regular);
        file.set_mode(0o644);
        file.set_size(5);
        append_raw(&mut builder, &mut file, b"cache/pwned", None, &b"pwned"[..]).unwrap();
        let buffer = builder.into_inner().unwrap();

        let err = TarArchive::new(dst.path())
            .extract(Path::new("cache"), &mut &buffer[..])
            .unwrap_err();

        assert!(matches!(err, Error::UnsafeEntryPath { .. }));
        assert!(!outside.path().join("pwned").exists());
    }

    #[test]
    fn test_hard_link_to_outside_file_is_rejected() {
        let dst = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        write(outside.path(), "secret", b"do not share");

        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Link);
        header.set_mode(0o644);
        header.set_size(0);
        let original = to_slash_bytes(&outside.path().join("secret"));
        append_raw(&mut builder, &mut header, b"cache/evil", Some(&original[..]), io::empty()).unwrap();
        let buffer = builder.into_inner().unwrap();

        let err = TarArchive::new(dst.path())
            .extract(Path::new("cache"), &mut &buffer[..])
            .unwrap_err();

        assert!(matches!(err, Error::UnsafeEntryPath { .. }));
        assert!(!dst.path().join("cache/evil").exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_round_trip() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let name = OsStr::from_bytes(b"caf\xe9.txt");
        fs::create_dir_all(src.path().join("cache")).unwrap();
        fs::write(src.path().join("cache").join(name), b"latin-1").unwrap();

        round_trip(src.path(), dst.path(), "cache", false);

        let restored: Vec<_> = fs::read_dir(dst.path().join("cache"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(restored, vec![name.to_os_string()]);
        assert_eq!(fs::read(dst.path().join("cache").join(name)).unwrap(), b"latin-1");
    }

    #[test]
    fn test_modification_times_restored() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(src.path(), "cache/nested/file.txt", b"old");
        let file_time = FileTime::from_unix_time(1_500_000_000, 0);
        let dir_time = FileTime::from_unix_time(1_400_000_000, 0);
        filetime::set_file_mtime(src.path().join("cache/nested/file.txt"), file_time).unwrap();
        filetime::set_file_mtime(src.path().join("cache/nested"), dir_time).unwrap();

        round_trip(src.path(), dst.path(), "cache", false);

        let file_meta = fs::metadata(dst.path().join("cache/nested/file.txt")).unwrap();
        let dir_meta = fs::metadata(dst.path().join("cache/nested")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&file_meta), file_time);
        assert_eq!(FileTime::from_last_modification_time(&dir_meta), dir_time);
    }
}

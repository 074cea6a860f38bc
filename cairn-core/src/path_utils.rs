//! Lexical path rules shared by the archive codec and the orchestrators.
//!
//! Nothing here touches the filesystem: archive names and object keys must
//! come out identical on every machine that runs a rebuild or restore.

use std::borrow::Cow;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Lexically normalizes a path: drops `.` components and folds `name/..` pairs.
///
/// Leading `..` components of a relative path are kept; `..` directly under
/// the root of an absolute path is dropped.
pub fn clean(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    parts.iter().map(|c| c.as_os_str()).collect()
}

/// Removes leading `..` components from a cleaned relative path.
pub fn strip_parent_prefix(path: &Path) -> PathBuf {
    path.components()
        .skip_while(|c| matches!(c, Component::ParentDir | Component::CurDir))
        .collect()
}

/// Renders a path with `/` separators, the form stored in archive headers.
///
/// Components are copied byte for byte, so names that are not valid UTF-8
/// survive unchanged.
pub fn to_slash_bytes(path: &Path) -> Vec<u8> {
    let mut out = Vec::new();
    for component in path.components() {
        match component {
            Component::RootDir => out.push(b'/'),
            Component::Prefix(prefix) => out.extend_from_slice(&os_bytes(prefix.as_os_str())),
            other => {
                if !out.is_empty() && out.last() != Some(&b'/') {
                    out.push(b'/');
                }
                out.extend_from_slice(&os_bytes(other.as_os_str()));
            }
        }
    }
    out
}

/// Slash-separated form of a path as text, used for object keys.
pub fn to_slash(path: &Path) -> String {
    String::from_utf8_lossy(&to_slash_bytes(path)).into_owned()
}

#[cfg(unix)]
fn os_bytes(s: &OsStr) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(s.as_bytes())
}

#[cfg(not(unix))]
fn os_bytes(s: &OsStr) -> Cow<'_, [u8]> {
    match s.to_string_lossy() {
        Cow::Borrowed(text) => Cow::Borrowed(text.as_bytes()),
        Cow::Owned(text) => Cow::Owned(text.into_bytes()),
    }
}

/// Archive name of a relative path: cleaned, leading `../` stripped, slash-separated.
///
/// The root of a tree collapses to `"."`.
pub fn archive_name(path: &Path) -> Vec<u8> {
    let name = to_slash_bytes(&strip_parent_prefix(&clean(path)));
    if name.is_empty() {
        b".".to_vec()
    } else {
        name
    }
}

/// Text form of [`archive_name`].
pub fn relative_name(path: &Path) -> String {
    String::from_utf8_lossy(&archive_name(path)).into_owned()
}

/// Returns `true` for a relative path that climbs above its base, e.g. `../x`.
///
/// Such mounts cannot round-trip: the archive name drops the leading `..`.
pub fn escapes_root(path: &Path) -> bool {
    !path.is_absolute() && matches!(clean(path).components().next(), Some(Component::ParentDir))
}

/// Location of `path` relative to `base`, computed lexically with leading `../` stripped.
///
/// Both inputs are expected to be of the same kind (both relative or both absolute).
pub fn relative_to(base: &Path, path: &Path) -> PathBuf {
    let base = clean(base);
    let path = clean(path);

    let base_parts: Vec<_> = base.components().collect();
    let path_parts: Vec<_> = path.components().collect();
    let common = base_parts
        .iter()
        .zip(path_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base_parts.len() {
        rel.push("..");
    }
    for part in &path_parts[common..] {
        rel.push(part.as_os_str());
    }

    strip_parent_prefix(&rel)
}

/// Resolves where an archive entry named `name` lands when extracting into `dst`.
///
/// `dst` is relative to `root` unless absolute. Absolute names and names equal
/// to `dst` are used verbatim; every other name is placed under `dst` after
/// being made relative to it. Returns `None` when the cleaned result would
/// still climb out of `dst`.
pub fn resolve_entry_target(root: &Path, dst: &Path, name: &Path) -> Option<PathBuf> {
    if name.is_absolute() {
        return Some(clean(name));
    }

    let name = clean(name);
    if name == clean(dst) {
        return Some(root.join(name));
    }

    let rel = if dst.is_absolute() {
        strip_parent_prefix(&name)
    } else {
        relative_to(dst, &name)
    };

    if rel.components().any(|c| matches!(c, Component::ParentDir)) {
        return None;
    }

    Some(root.join(dst).join(rel))
}

/// Builds the remote object key `namespace/key/mount`.
///
/// The mount is slash-normalized with any leading `/` and `../` removed, so
/// absolute mounts map to keys nested under the cache key as well.
pub fn object_key(namespace: &str, key: &str, mount: &str) -> String {
    let mount = relative_name(Path::new(mount.trim_start_matches('/')));
    let prefix = object_prefix(namespace, key);
    if mount == "." {
        prefix
    } else {
        format!("{}/{}", prefix, mount)
    }
}

/// Builds the prefix `namespace/key` under which all objects of one run live.
pub fn object_prefix(namespace: &str, key: &str) -> String {
    [namespace, key]
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean() {
        assert_eq!(clean(Path::new("a/./b/../c")), PathBuf::from("a/c"));
        assert_eq!(clean(Path::new("../../a")), PathBuf::from("../../a"));
        assert_eq!(clean(Path::new("/../etc")), PathBuf::from("/etc"));
        assert_eq!(clean(Path::new("./")), PathBuf::new());
    }

    #[test]
    fn test_relative_name_strips_parent_segments() {
        assert_eq!(relative_name(Path::new("../../vendor/lib.rs")), "vendor/lib.rs");
        assert_eq!(relative_name(Path::new("./node_modules/x")), "node_modules/x");
        assert_eq!(relative_name(Path::new(".")), ".");
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(
            relative_to(Path::new("node_modules"), Path::new("node_modules/a/b")),
            PathBuf::from("a/b")
        );
        assert_eq!(
            relative_to(Path::new("node_modules"), Path::new("other/x")),
            PathBuf::from("other/x")
        );
    }

    #[test]
    fn test_resolve_entry_target() {
        let root = Path::new("/work");
        assert_eq!(
            resolve_entry_target(root, Path::new("target"), Path::new("target/debug/app")),
            Some(PathBuf::from("/work/target/debug/app"))
        );
        assert_eq!(
            resolve_entry_target(root, Path::new("target"), Path::new("target")),
            Some(PathBuf::from("/work/target"))
        );
        assert_eq!(
            resolve_entry_target(root, Path::new("target"), Path::new("/opt/cache/x")),
            Some(PathBuf::from("/opt/cache/x"))
        );
        assert_eq!(
            resolve_entry_target(root, Path::new("target"), Path::new("../../etc/passwd")),
            Some(PathBuf::from("/work/target/etc/passwd"))
        );
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("repo", "abc", "node_modules"), "repo/abc/node_modules");
        assert_eq!(object_key("repo/", "abc", "/root/.cargo"), "repo/abc/root/.cargo");
        assert_eq!(object_key("repo", "abc", "../sibling/dir"), "repo/abc/sibling/dir");
        assert_eq!(object_prefix("", "abc"), "abc");
    }

    #[test]
    fn test_escapes_root() {
        assert!(escapes_root(Path::new("../sibling")));
        assert!(escapes_root(Path::new("a/../../b")));
        assert!(!escapes_root(Path::new("a/../b")));
        assert!(!escapes_root(Path::new("/abs/../x")));
        assert!(!escapes_root(Path::new(".")));
    }

    #[cfg(unix)]
    #[test]
    fn test_archive_name_keeps_raw_bytes() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = Path::new("cache").join(OsStr::from_bytes(b"caf\xe9.txt"));
        assert_eq!(archive_name(&path), b"cache/caf\xe9.txt".to_vec());
        assert_eq!(relative_name(&path), "cache/caf\u{FFFD}.txt");
    }
}

//! Path-string helpers shared by lookup, enumeration and the buffer layer.
//!
//! Paths are compared byte-for-byte against store keys, so nothing here
//! normalizes separators. The root directory is the empty path `""`; its
//! children are `"/name"`.

pub use etcdfs_kv::{key_after, prefix_range_end, RangeEnd};

pub const SEPARATOR: char = '/';
const SEPARATOR_BYTE: u8 = b'/';

/// The path of the root directory.
pub const ROOT: &str = "";

/// Join `parent` and `name` with exactly one separator.
///
/// `resolve("", "aaa") == "/aaa"`, `resolve("", "") == "/"` and
/// `resolve("/aweme", "") == "/aweme/"`.
pub fn resolve(parent: &str, name: &str) -> String {
    let mut out = String::with_capacity(parent.len() + 1 + name.len());
    out.push_str(parent);
    out.push(SEPARATOR);
    out.push_str(name);
    out
}

/// Strip `parent` from `key` and split off the first component.
///
/// Returns the component and whether anything (even an empty component)
/// follows it. A `key` that does not start with `parent` is split as is.
pub fn next_hierarchy_level<'a>(key: &'a [u8], parent: &[u8]) -> (&'a [u8], bool) {
    let rest = key.strip_prefix(parent).unwrap_or(key);
    match rest.iter().position(|&b| b == SEPARATOR_BYTE) {
        Some(idx) => (&rest[..idx], true),
        None => (rest, false),
    }
}

/// Whether a listed component can be presented as a directory entry.
///
/// Empty components come from doubled separators; `.` and `..` would alias
/// the directory itself or its parent.
pub fn is_presentable(component: &[u8]) -> bool {
    !matches!(component, b"" | b"." | b"..")
}

/// The directory containing `path`, `ROOT` for top-level entries.
pub fn parent_of(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(idx) => &path[..idx],
        None => ROOT,
    }
}

/// Smallest key greater than every descendant of `path`, i.e. the end of
/// the range `[path + "/", ...)`.
pub fn descendants_end(path: &str) -> RangeEnd {
    let mut prefix = path.as_bytes().to_vec();
    prefix.push(SEPARATOR_BYTE);
    prefix_range_end(&prefix)
}

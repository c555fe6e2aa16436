//! Directory enumeration over a flat, sorted keyspace.
//!
//! One level of the tree is rebuilt from a paged, keys-only scan of
//! `[dir + "/", prefix_range_end(dir + "/"))`. After each page the scan
//! skips past the subtree of the last child seen instead of paging through
//! its descendants, so a child with millions of nested keys costs one page.

use std::collections::HashMap;

use etcdfs_kv::{KvStore, RangeEnd, ScanRequest};

use crate::error::FsError;
use crate::inode::inode_of;
use crate::path::{
    descendants_end, is_presentable, key_after, next_hierarchy_level, prefix_range_end, resolve,
};

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_directory: bool,
    pub inode: u64,
}

/// Paging and safety limits for one listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListLimits {
    /// Keys fetched per scan.
    pub page_size: usize,
    /// Listing stops, with a warning, once this many children are known.
    pub max_entries: usize,
}

impl Default for ListLimits {
    fn default() -> Self {
        Self {
            page_size: 500,
            max_entries: 1000,
        }
    }
}

/// Where the next page starts after a page ending in `last_key`.
///
/// If the last key lies below a child directory, everything under
/// `child + "/"` is skipped. If it is the child itself, the scan resumes
/// right after it so siblings sharing the name as a prefix (`foo` vs
/// `foobar`) are not jumped over.
fn next_page_start(prefix: &[u8], last_key: &[u8]) -> RangeEnd {
    let (component, has_more) = next_hierarchy_level(last_key, prefix);
    if has_more {
        let mut subtree = Vec::with_capacity(prefix.len() + component.len() + 1);
        subtree.extend_from_slice(prefix);
        subtree.extend_from_slice(component);
        subtree.push(b'/');
        prefix_range_end(&subtree)
    } else {
        RangeEnd::Bounded(key_after(last_key))
    }
}

/// List the immediate children of `dir`.
///
/// A name seen both as a key and as a prefix of deeper keys is reported as
/// a directory. Any scan failure fails the whole listing.
pub async fn list_children(
    store: &dyn KvStore,
    dir: &str,
    limits: ListLimits,
) -> Result<Vec<DirEntry>, FsError> {
    let prefix = resolve(dir, "").into_bytes();
    let end = descendants_end(dir);
    let page_size = limits.page_size.max(1);

    let mut entries: Vec<DirEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut start = prefix.clone();
    let mut pages = 0usize;
    let mut cut_at: Option<Vec<u8>> = None;

    'pages: loop {
        let req = ScanRequest::range(start.clone(), end.clone()).with_limit(page_size);
        let page = store.scan(&req).await.map_err(|status| {
            tracing::error!(path = %dir, error = %status, "failed to list keys");
            FsError::Io(status)
        })?;
        pages += 1;

        let Some(last_key) = page.keys.last() else {
            break;
        };

        for key in &page.keys {
            let (component, has_more) = next_hierarchy_level(key, &prefix);
            if !is_presentable(component) {
                continue;
            }
            let Ok(name) = std::str::from_utf8(component) else {
                tracing::warn!(path = %dir, key = ?String::from_utf8_lossy(key), "skipping non UTF-8 key");
                continue;
            };
            if let Some(&pos) = index.get(name) {
                if has_more {
                    entries[pos].is_directory = true;
                }
                continue;
            }
            if entries.len() >= limits.max_entries {
                tracing::warn!(
                    path = %dir,
                    limit = limits.max_entries,
                    "directory has too many entries, skipping the rest"
                );
                cut_at = Some(key.clone());
                break 'pages;
            }
            index.insert(name.to_string(), entries.len());
            entries.push(DirEntry {
                name: name.to_string(),
                is_directory: has_more,
                inode: inode_of(&resolve(dir, name)),
            });
        }

        if !page.has_more {
            break;
        }
        match next_page_start(&prefix, last_key) {
            RangeEnd::Bounded(next) if end.admits(&next) => start = next,
            _ => break,
        }
    }

    if let Some(cut) = cut_at {
        classify_unscanned(store, dir, &cut, &mut entries).await?;
    }

    tracing::debug!(path = %dir, entries = entries.len(), pages, "listed directory");
    Ok(entries)
}

/// After a listing stopped at `cut`, settle the kind of every recorded file
/// whose descendants would sort after `cut` and so were never scanned.
///
/// Only names that are a prefix of the cut component (`b` before `b-1`)
/// qualify, so this is normally zero or one extra scan.
async fn classify_unscanned(
    store: &dyn KvStore,
    dir: &str,
    cut: &[u8],
    entries: &mut [DirEntry],
) -> Result<(), FsError> {
    for entry in entries.iter_mut().filter(|e| !e.is_directory) {
        let below = resolve(&resolve(dir, &entry.name), "");
        if below.as_bytes() <= cut {
            continue;
        }
        let req = ScanRequest::prefix(below.clone()).with_limit(1);
        let page = store.scan(&req).await.map_err(|status| {
            tracing::error!(path = %below, error = %status, "failed to list keys");
            FsError::Io(status)
        })?;
        entry.is_directory = !page.keys.is_empty();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use etcdfs_kv_backends::MemKvStore;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn store_with(keys: &[&[u8]]) -> MemKvStore {
        let store = MemKvStore::new();
        for key in keys {
            store.insert(key.to_vec(), Vec::new());
        }
        store
    }

    fn names(entries: &[DirEntry]) -> BTreeMap<String, bool> {
        entries
            .iter()
            .map(|e| (e.name.clone(), e.is_directory))
            .collect()
    }

    fn limits(page_size: usize) -> ListLimits {
        ListLimits {
            page_size,
            max_entries: 1000,
        }
    }

    #[tokio::test]
    async fn test_file_and_directory_children() {
        let store = store_with(&[b"/a", b"/a/b", b"/c"]);
        let entries = list_children(&store, "", ListLimits::default()).await.unwrap();
        assert_eq!(entries.len(), 2);
        let by_name = names(&entries);
        assert_eq!(by_name["a"], true);
        assert_eq!(by_name["c"], false);
    }

    #[tokio::test]
    async fn test_nested_listing() {
        let store = store_with(&[b"/d/x", b"/d/y/z", b"/d/y/w", b"/dz", b"/d0"]);
        let entries = list_children(&store, "/d", ListLimits::default()).await.unwrap();
        let by_name = names(&entries);
        assert_eq!(by_name.len(), 2);
        assert_eq!(by_name["x"], false);
        assert_eq!(by_name["y"], true);
        let y = entries.iter().find(|e| e.name == "y").unwrap();
        assert_eq!(y.inode, inode_of("/d/y"));
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let store = store_with(&[b"/other"]);
        assert!(list_children(&store, "/missing", ListLimits::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_keys_outside_root_are_invisible() {
        let store = store_with(&[b"_ping", b"config", b"/visible"]);
        let entries = list_children(&store, "", ListLimits::default()).await.unwrap();
        assert_eq!(names(&entries).into_keys().collect::<Vec<_>>(), vec!["visible"]);
    }

    #[tokio::test]
    async fn test_unpresentable_components_skipped() {
        let store = store_with(&[b"/d//x", b"/d/./y", b"/d/../z", b"/d/", b"/d/ok"]);
        let entries = list_children(&store, "/d", limits(1)).await.unwrap();
        assert_eq!(names(&entries).into_keys().collect::<Vec<_>>(), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_skip_ahead_avoids_scanning_subtree() {
        let store = MemKvStore::new();
        for i in 0..5000 {
            store.insert(format!("/big/{:05}", i), Vec::new());
        }
        store.insert("/small", Vec::new());
        store.insert("/tail/x", Vec::new());

        let entries = list_children(&store, "", limits(10)).await.unwrap();
        let by_name = names(&entries);
        assert_eq!(by_name.len(), 3);
        assert!(by_name["big"]);
        assert!(!by_name["small"]);
        assert!(by_name["tail"]);
        // one page lands in /big/, the next jumps straight past it
        assert!(store.scan_count() <= 2, "scans: {}", store.scan_count());
    }

    #[tokio::test]
    async fn test_siblings_sharing_a_prefix_survive_paging() {
        let store = store_with(&[b"/foo", b"/foo-bar", b"/foo.d/x", b"/foo/x", b"/foobar"]);
        for page_size in 1..=6 {
            let entries = list_children(&store, "", limits(page_size)).await.unwrap();
            let by_name = names(&entries);
            assert_eq!(
                by_name.keys().map(String::as_str).collect::<Vec<_>>(),
                vec!["foo", "foo-bar", "foo.d", "foobar"],
                "page size {}",
                page_size
            );
            assert!(by_name["foo"], "page size {}", page_size);
            assert!(by_name["foo.d"]);
        }
    }

    #[tokio::test]
    async fn test_listing_is_independent_of_page_size() {
        let keys: Vec<Vec<u8>> = vec![
            b"/a".to_vec(),
            b"/a/1".to_vec(),
            b"/a/2/3".to_vec(),
            b"/a\xff".to_vec(),
            b"/a\xff/q".to_vec(),
            b"/b\xff\xff/z".to_vec(),
            b"/c".to_vec(),
            b"/c/".to_vec(),
            b"/\xff".to_vec(),
            b"/\xff\xff/\xff".to_vec(),
        ];
        let store = MemKvStore::new();
        for key in &keys {
            store.insert(key.clone(), Vec::new());
        }

        let reference = names(&list_children(&store, "", limits(1000)).await.unwrap());
        for page_size in 1..=keys.len() + 1 {
            let entries = list_children(&store, "", limits(page_size)).await.unwrap();
            assert_eq!(names(&entries), reference, "page size {}", page_size);
            let mut seen: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
            seen.sort_unstable();
            seen.dedup();
            assert_eq!(seen.len(), entries.len(), "duplicates at page size {}", page_size);
        }
        // non UTF-8 names are left out
        assert_eq!(reference.len(), 2);
        assert!(reference["a"]);
        assert!(reference["c"]);
    }

    #[tokio::test]
    async fn test_max_entries_cap() {
        let store = MemKvStore::new();
        for i in 0..50 {
            store.insert(format!("/f{:02}", i), Vec::new());
        }
        let entries = list_children(
            &store,
            "",
            ListLimits {
                page_size: 7,
                max_entries: 20,
            },
        )
        .await
        .unwrap();
        assert_eq!(entries.len(), 20);
        assert_eq!(entries[0].name, "f00");
        assert_eq!(entries[19].name, "f19");
    }

    #[tokio::test]
    async fn test_cap_still_classifies_last_entry() {
        let store = store_with(&[b"/a", b"/b", b"/b/x"]);
        let capped = ListLimits {
            page_size: 500,
            max_entries: 2,
        };
        let entries = list_children(&store, "", capped).await.unwrap();
        let by_name = names(&entries);
        assert_eq!(by_name.len(), 2);
        assert!(!by_name["a"]);
        assert!(by_name["b"]);

        let root = crate::node::DirNode::root(Arc::new(store.clone()));
        assert_eq!(
            root.lookup("b").await.unwrap().kind(),
            crate::node::NodeKind::Directory
        );
    }

    #[tokio::test]
    async fn test_cap_classifies_entries_cut_before_their_children() {
        // "/b-1" sorts between "/b" and "/b/x" and is the name that hits the cap
        let store = store_with(&[b"/a", b"/b", b"/b-1", b"/b/x"]);
        let capped = ListLimits {
            page_size: 2,
            max_entries: 2,
        };
        let entries = list_children(&store, "", capped).await.unwrap();
        let by_name = names(&entries);
        assert_eq!(by_name.len(), 2);
        assert!(!by_name["a"]);
        assert!(by_name["b"]);
    }

    #[tokio::test]
    async fn test_exact_cap_lists_everything() {
        let store = store_with(&[b"/a", b"/b", b"/b/x"]);
        let before = store.scan_count();
        let capped = ListLimits {
            page_size: 500,
            max_entries: 2,
        };
        let entries = list_children(&store, "", capped).await.unwrap();
        assert_eq!(entries.len(), 2);
        // one page, no follow-up classification scans
        assert_eq!(store.scan_count() - before, 1);
    }

    #[tokio::test]
    async fn test_scan_failure_fails_listing() {
        let store = MemKvStore::new();
        for i in 0..10 {
            store.insert(format!("/f{}", i), Vec::new());
        }
        store.fail_next(1);
        let err = list_children(&store, "", limits(3)).await.unwrap_err();
        assert_eq!(err.errno(), libc::EIO);
    }

    #[test]
    fn test_next_page_start() {
        assert_eq!(
            next_page_start(b"/", b"/foo/deep/key"),
            RangeEnd::Bounded(b"/foo0".to_vec())
        );
        assert_eq!(
            next_page_start(b"/", b"/foo"),
            RangeEnd::Bounded(b"/foo\0".to_vec())
        );
        assert_eq!(
            next_page_start(b"/d/", b"/d/\xff/x"),
            RangeEnd::Bounded(b"/d/\xff0".to_vec())
        );
    }
}

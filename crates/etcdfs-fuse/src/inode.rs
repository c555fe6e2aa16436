//! Inode numbering and the per-mount inode and handle tables.
//!
//! Inode numbers are a pure function of the path. The tables only remember
//! which path a number was handed out for (so later kernel calls that carry
//! only the number can be routed) and which nodes are held open.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::node::{FileNode, NodeKind};
use crate::readdir::DirEntry;
use crate::types::FUSE_ROOT_ID;

// ── Allocator ───────────────────────────────────────────────────────────────

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// The inode number of `path`.
///
/// The root path maps to [`FUSE_ROOT_ID`]. Every other path is its FNV-1a
/// hash, moved off the reserved values 0 and 1. Collisions are not detected.
pub fn inode_of(path: &str) -> u64 {
    if path.is_empty() {
        return FUSE_ROOT_ID;
    }
    let hash = fnv1a_64(path.as_bytes());
    if hash <= FUSE_ROOT_ID {
        hash + 2
    } else {
        hash
    }
}

// ── Inode table ─────────────────────────────────────────────────────────────

/// What an inode number was handed out for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeEntry {
    pub path: String,
    pub kind: NodeKind,
}

#[derive(Debug)]
struct Slot {
    entry: InodeEntry,
    lookups: u64,
}

/// Inode number → path map with kernel lookup counts.
///
/// Each entry returned to the kernel (lookup, create) counts one reference;
/// `forget` releases them and drops the mapping at zero. The root is pinned.
pub struct InodeTable {
    slots: Mutex<HashMap<u64, Slot>>,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut map = HashMap::new();
        map.insert(
            FUSE_ROOT_ID,
            Slot {
                entry: InodeEntry {
                    path: crate::path::ROOT.to_string(),
                    kind: NodeKind::Directory,
                },
                lookups: 1,
            },
        );
        Self {
            slots: Mutex::new(map),
        }
    }

    /// Record one kernel reference to `path` and return its inode number.
    ///
    /// A path re-discovered with a different kind replaces the old kind.
    pub fn add_entry(&self, path: &str, kind: NodeKind) -> u64 {
        let ino = inode_of(path);
        let mut map = self.slots.lock();
        match map.get_mut(&ino) {
            Some(slot) => {
                if slot.entry.path != path {
                    tracing::warn!(ino, old = %slot.entry.path, new = %path, "inode hash collision");
                    slot.entry.path = path.to_string();
                }
                slot.entry.kind = kind;
                slot.lookups += 1;
            }
            None => {
                map.insert(
                    ino,
                    Slot {
                        entry: InodeEntry {
                            path: path.to_string(),
                            kind,
                        },
                        lookups: 1,
                    },
                );
            }
        }
        ino
    }

    /// Drop `nlookup` references. The root is never removed.
    pub fn forget(&self, ino: u64, nlookup: u64) {
        if ino == FUSE_ROOT_ID {
            return;
        }
        let mut map = self.slots.lock();
        if let Some(slot) = map.get_mut(&ino) {
            slot.lookups = slot.lookups.saturating_sub(nlookup);
            if slot.lookups == 0 {
                map.remove(&ino);
            }
        }
    }

    pub fn get(&self, ino: u64) -> Option<InodeEntry> {
        self.slots.lock().get(&ino).map(|slot| slot.entry.clone())
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InodeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InodeTable")
            .field("len", &self.len())
            .finish()
    }
}

// ── Handles ─────────────────────────────────────────────────────────────────

/// An open file: the node whose buffer accumulates writes until release.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub ino: u64,
    pub node: Arc<FileNode>,
    pub flags: i32,
}

/// An open directory: the listing taken at opendir, served by offset.
#[derive(Debug, Clone)]
pub struct DirHandle {
    pub ino: u64,
    pub path: String,
    pub entries: Arc<Vec<DirEntry>>,
}

/// Thread-safe table mapping file handle IDs to open files and directories.
pub struct HandleTable {
    next_id: AtomicU64,
    file_handles: DashMap<u64, FileHandle>,
    dir_handles: DashMap<u64, DirHandle>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            file_handles: DashMap::new(),
            dir_handles: DashMap::new(),
        }
    }

    pub fn insert_file(&self, handle: FileHandle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.file_handles.insert(id, handle);
        id
    }

    /// The handle's node, cloned out so no map lock is held across I/O.
    pub fn file(&self, id: u64) -> Option<FileHandle> {
        self.file_handles.get(&id).map(|h| h.value().clone())
    }

    pub fn remove_file(&self, id: u64) -> Option<FileHandle> {
        self.file_handles.remove(&id).map(|(_, v)| v)
    }

    /// Any open handle on `ino`, used to answer getattr from live buffers.
    pub fn any_file_for(&self, ino: u64) -> Option<FileHandle> {
        self.file_handles
            .iter()
            .find(|h| h.value().ino == ino)
            .map(|h| h.value().clone())
    }

    pub fn insert_dir(&self, handle: DirHandle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.dir_handles.insert(id, handle);
        id
    }

    pub fn dir(&self, id: u64) -> Option<DirHandle> {
        self.dir_handles.get(&id).map(|h| h.value().clone())
    }

    pub fn remove_dir(&self, id: u64) -> Option<DirHandle> {
        self.dir_handles.remove(&id).map(|(_, v)| v)
    }

    pub fn file_count(&self) -> usize {
        self.file_handles.len()
    }

    pub fn dir_count(&self) -> usize {
        self.dir_handles.len()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("file_count", &self.file_handles.len())
            .field("dir_count", &self.dir_handles.len())
            .finish()
    }
}

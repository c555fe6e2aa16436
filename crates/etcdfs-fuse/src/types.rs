//! FUSE-side types mirroring the kernel protocol structures.
//!
//! These keep `FuseOps` independent of the `fuser` crate, so the filesystem
//! can be driven directly in tests.

use etcdfs_types::{Gid, Uid};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::node::NodeKind;

/// The FUSE root inode number (always 1 in the kernel protocol).
pub const FUSE_ROOT_ID: u64 = 1;

// ── File type and mode bits ─────────────────────────────────────────────────

/// Regular file.
pub const S_IFREG: u32 = libc::S_IFREG as u32;
/// Directory.
pub const S_IFDIR: u32 = libc::S_IFDIR as u32;

/// rw-r--r--
pub const FILE_PERM: u32 = 0o644;
/// rwxr-xr-x
pub const DIR_PERM: u32 = 0o755;

/// Reply flag asking the kernel to bypass the page cache for this handle.
pub const FOPEN_DIRECT_IO: u32 = 1;

pub const BLOCK_SIZE: u32 = 4096;
pub const NAME_MAX: u32 = 255;
/// Largest single write request negotiated with the kernel.
pub const MAX_WRITE: u32 = 1 << 20;

impl NodeKind {
    /// `S_IF*` type bits plus the fixed permission bits for this kind.
    pub fn mode(self) -> u32 {
        match self {
            NodeKind::File => S_IFREG | FILE_PERM,
            NodeKind::Directory => S_IFDIR | DIR_PERM,
        }
    }

    /// `DT_*` value for directory listings.
    pub fn dirent_type(self) -> u32 {
        match self {
            NodeKind::File => libc::DT_REG as u32,
            NodeKind::Directory => libc::DT_DIR as u32,
        }
    }
}

// ── File attribute struct ───────────────────────────────────────────────────

/// File attributes returned by getattr/lookup operations.
#[derive(Debug, Clone)]
pub struct FileAttr {
    pub ino: u64,
    pub size: u64,
    /// Number of 512-byte blocks.
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    /// Type and permission bits.
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

impl Default for FileAttr {
    fn default() -> Self {
        Self {
            ino: 0,
            size: 0,
            blocks: 0,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            mode: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: 0,
        }
    }
}

impl FileAttr {
    pub fn new(ino: u64) -> Self {
        Self {
            ino,
            ..Default::default()
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == S_IFDIR
    }
}

// ── FUSE entry param ────────────────────────────────────────────────────────

/// Entry returned by lookup and create.
///
/// Mirrors `struct fuse_entry_param`.
#[derive(Debug, Clone)]
pub struct FuseEntryParam {
    pub ino: u64,
    pub generation: u64,
    pub attr: FileAttr,
    /// Attribute cache validity.
    pub attr_timeout: Duration,
    /// Name lookup cache validity.
    pub entry_timeout: Duration,
}

impl FuseEntryParam {
    pub fn new(attr: FileAttr, attr_timeout: Duration, entry_timeout: Duration) -> Self {
        Self {
            ino: attr.ino,
            generation: 0,
            attr,
            attr_timeout,
            entry_timeout,
        }
    }
}

// ── Filesystem statistics ───────────────────────────────────────────────────

/// Filesystem statistics returned by statfs. Mirrors `struct statvfs`.
#[derive(Debug, Clone, Default)]
pub struct StatFs {
    pub bsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub namelen: u32,
}

// ── Open file flags ─────────────────────────────────────────────────────────

/// Parsed open flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read_only: bool,
    pub write_only: bool,
    pub read_write: bool,
    pub truncate: bool,
    pub append: bool,
}

impl OpenFlags {
    /// Parse raw POSIX open flags into structured form.
    pub fn from_raw(flags: i32) -> Self {
        let access_mode = flags & libc::O_ACCMODE;
        Self {
            read_only: access_mode == libc::O_RDONLY,
            write_only: access_mode == libc::O_WRONLY,
            read_write: access_mode == libc::O_RDWR,
            truncate: flags & libc::O_TRUNC != 0,
            append: flags & libc::O_APPEND != 0,
        }
    }

    /// Returns true if the file is opened for writing (write-only or read-write).
    pub fn is_writable(&self) -> bool {
        self.write_only || self.read_write
    }

    /// Whether opening with these flags modifies the file.
    pub fn mutates(&self) -> bool {
        self.is_writable() || self.truncate || self.append
    }
}

// ── FUSE request context ────────────────────────────────────────────────────

/// Caller identity of a FUSE request. Mirrors `fuse_req_ctx`.
#[derive(Debug, Clone, Copy)]
pub struct FuseRequestContext {
    pub uid: Uid,
    pub gid: Gid,
    pub pid: u32,
}

// ── Dir entry for readdir ───────────────────────────────────────────────────

/// A single directory entry returned by readdir.
#[derive(Debug, Clone)]
pub struct FuseDirEntry {
    pub ino: u64,
    /// Offset of the entry that follows this one.
    pub offset: i64,
    /// `DT_REG` or `DT_DIR`.
    pub file_type: u32,
    pub name: String,
}

// ── Connection info ─────────────────────────────────────────────────────────

/// FUSE connection parameters negotiated during init.
///
/// Zero leaves the kernel's default in place.
#[derive(Debug, Clone, Default)]
pub struct FuseConnInfo {
    pub max_readahead: u32,
    pub max_write: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags_parse() {
        let parsed = OpenFlags::from_raw(libc::O_RDWR | libc::O_TRUNC);
        assert!(parsed.read_write);
        assert!(parsed.truncate);
        assert!(parsed.is_writable());
        assert!(!parsed.append);
        assert!(parsed.mutates());
    }

    #[test]
    fn test_open_flags_read_only() {
        let flags = OpenFlags::from_raw(libc::O_RDONLY);
        assert!(flags.read_only);
        assert!(!flags.is_writable());
        assert!(!flags.mutates());
        assert!(OpenFlags::from_raw(libc::O_RDONLY | libc::O_APPEND).mutates());
    }

    #[test]
    fn test_node_kind_modes() {
        assert_eq!(NodeKind::File.mode(), libc::S_IFREG as u32 | 0o644);
        assert_eq!(NodeKind::Directory.mode(), libc::S_IFDIR as u32 | 0o755);
        assert_eq!(NodeKind::File.dirent_type(), libc::DT_REG as u32);
        assert_eq!(NodeKind::Directory.dirent_type(), libc::DT_DIR as u32);
    }

    #[test]
    fn test_file_attr_is_dir() {
        let mut attr = FileAttr::new(42);
        assert_eq!(attr.ino, 42);
        assert!(!attr.is_dir());
        attr.mode = NodeKind::Directory.mode();
        assert!(attr.is_dir());
        attr.mode = NodeKind::File.mode();
        assert!(!attr.is_dir());
    }

    #[test]
    fn test_entry_param_takes_ino_from_attr() {
        let attr = FileAttr {
            ino: 100,
            size: 4096,
            mode: S_IFREG | FILE_PERM,
            ..Default::default()
        };
        let entry = FuseEntryParam::new(attr, Duration::from_millis(200), Duration::from_secs(1));
        assert_eq!(entry.ino, 100);
        assert_eq!(entry.generation, 0);
        assert_eq!(entry.attr.size, 4096);
        assert_eq!(entry.entry_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_fuse_conn_info_default_keeps_kernel_values() {
        let info = FuseConnInfo::default();
        assert_eq!(info.max_readahead, 0);
        assert_eq!(info.max_write, 0);
    }
}

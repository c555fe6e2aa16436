//! FUSE operations trait.
//!
//! `FuseOps` is the protocol-agnostic surface a mount is driven through:
//! the `fuser` adapter in [`crate::session`] in production, tests directly.
//! Only the operations a flat key namespace can back are present.

use crate::reply::*;
use crate::types::*;

/// FUSE low-level operations.
///
/// Default implementations return `ENOSYS`, except the lifecycle hooks and
/// the close-path calls (`flush`, `release`, `releasedir`) which succeed.
///
/// Operations return `FuseResult<T>` where the error value is an errno
/// (positive integer, e.g., `libc::ENOENT`).
#[async_trait::async_trait]
pub trait FuseOps: Send + Sync + 'static {
    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Called when the filesystem is mounted.
    async fn init(&self, conn_info: &mut FuseConnInfo) -> FuseResult<()> {
        let _ = conn_info;
        Ok(())
    }

    /// Called when the filesystem is unmounted.
    async fn destroy(&self) {}

    // ── Name lookup ─────────────────────────────────────────────────────

    /// Look up a directory entry by name and return its attributes.
    async fn lookup(
        &self,
        ctx: FuseRequestContext,
        parent: u64,
        name: &str,
    ) -> FuseResult<ReplyEntry> {
        let _ = (ctx, parent, name);
        Err(libc::ENOSYS)
    }

    /// Drop `nlookup` kernel references to an inode.
    async fn forget(&self, ino: u64, nlookup: u64) {
        let _ = (ino, nlookup);
    }

    // ── Attribute operations ────────────────────────────────────────────

    async fn getattr(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: Option<u64>,
    ) -> FuseResult<ReplyAttr> {
        let _ = (ctx, ino, fh);
        Err(libc::ENOSYS)
    }

    async fn setattr(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        attrs: &SetAttrValues,
        fh: Option<u64>,
    ) -> FuseResult<ReplyAttr> {
        let _ = (ctx, ino, attrs, fh);
        Err(libc::ENOSYS)
    }

    // ── File creation / deletion ────────────────────────────────────────

    /// Remove a file.
    async fn unlink(&self, ctx: FuseRequestContext, parent: u64, name: &str) -> FuseResult<()> {
        let _ = (ctx, parent, name);
        Err(libc::ENOSYS)
    }

    /// Atomically create and open a file.
    async fn create(
        &self,
        ctx: FuseRequestContext,
        parent: u64,
        name: &str,
        mode: u32,
        flags: i32,
    ) -> FuseResult<ReplyCreate> {
        let _ = (ctx, parent, name, mode, flags);
        Err(libc::ENOSYS)
    }

    // ── File I/O ────────────────────────────────────────────────────────

    async fn open(&self, ctx: FuseRequestContext, ino: u64, flags: i32) -> FuseResult<ReplyOpen> {
        let _ = (ctx, ino, flags);
        Err(libc::ENOSYS)
    }

    async fn read(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let _ = (ctx, ino, fh, offset, size);
        Err(libc::ENOSYS)
    }

    async fn write(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        flags: i32,
    ) -> FuseResult<ReplyWrite> {
        let _ = (ctx, ino, fh, offset, data, flags);
        Err(libc::ENOSYS)
    }

    /// Called on each `close()` of a file descriptor (there may be several
    /// if the fd was dup'd).
    async fn flush(&self, ctx: FuseRequestContext, ino: u64, fh: u64) -> FuseResult<()> {
        let _ = (ctx, ino, fh);
        Ok(())
    }

    /// Called once per open, after the last descriptor is closed.
    async fn release(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: u64,
        flags: i32,
    ) -> FuseResult<()> {
        let _ = (ctx, ino, fh, flags);
        Ok(())
    }

    async fn fsync(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: u64,
        datasync: bool,
    ) -> FuseResult<()> {
        let _ = (ctx, ino, fh, datasync);
        Err(libc::ENOSYS)
    }

    // ── Directory I/O ───────────────────────────────────────────────────

    async fn opendir(&self, ctx: FuseRequestContext, ino: u64) -> FuseResult<ReplyOpen> {
        let _ = (ctx, ino);
        Err(libc::ENOSYS)
    }

    /// Read directory entries starting after `offset` (0 = from the start).
    async fn readdir(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory> {
        let _ = (ctx, ino, fh, offset);
        Err(libc::ENOSYS)
    }

    async fn releasedir(&self, ctx: FuseRequestContext, ino: u64, fh: u64) -> FuseResult<()> {
        let _ = (ctx, ino, fh);
        Ok(())
    }

    // ── Filesystem info ─────────────────────────────────────────────────

    async fn statfs(&self, ctx: FuseRequestContext, ino: u64) -> FuseResult<ReplyStatFs> {
        let _ = (ctx, ino);
        Err(libc::ENOSYS)
    }
}

// ── SetAttrValues ───────────────────────────────────────────────────────────

/// Values to set in a setattr operation.
///
/// Each field is `Some` if the kernel asked for that attribute to change.
#[derive(Debug, Clone, Default)]
pub struct SetAttrValues {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// New file size (truncate).
    pub size: Option<u64>,
    pub atime: Option<SetAttrTime>,
    pub mtime: Option<SetAttrTime>,
}

impl SetAttrValues {
    /// Whether anything other than the size was requested.
    pub fn has_metadata_changes(&self) -> bool {
        self.mode.is_some()
            || self.uid.is_some()
            || self.gid.is_some()
            || self.atime.is_some()
            || self.mtime.is_some()
    }
}

/// A time value for setattr, which can be an explicit time or "now".
#[derive(Debug, Clone)]
pub enum SetAttrTime {
    Now,
    Specific(std::time::SystemTime),
}

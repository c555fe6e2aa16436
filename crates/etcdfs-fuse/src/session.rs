//! Binding of [`FuseOps`] to the kernel through `fuser`.
//!
//! `fuser` drives its `Filesystem` from a single session thread with
//! `&mut self`. The adapter copies each request's arguments out, spawns the
//! operation on the tokio runtime and answers from there, so slow store
//! round-trips on one path never hold up calls on another.

use std::ffi::OsStr;
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    BackgroundSession, FileType, KernelConfig, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use etcdfs_types::{Gid, Uid};

use crate::config::FuseConfig;
use crate::ops::{FuseOps, SetAttrTime, SetAttrValues};
use crate::types::{FileAttr, FuseConnInfo, FuseRequestContext};

/// Subtype shown as `fuse.etcdfs` in the mount table.
pub const SUBTYPE: &str = "etcdfs";

fn request_context(req: &Request<'_>) -> FuseRequestContext {
    FuseRequestContext {
        uid: Uid(req.uid()),
        gid: Gid(req.gid()),
        pid: req.pid(),
    }
}

fn to_fuser_attr(attr: &FileAttr) -> fuser::FileAttr {
    let kind = if attr.is_dir() {
        FileType::Directory
    } else {
        FileType::RegularFile
    };
    fuser::FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind,
        perm: (attr.mode & 0o7777) as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev,
        blksize: attr.blksize,
        flags: 0,
    }
}

fn to_set_attr_time(t: TimeOrNow) -> SetAttrTime {
    match t {
        TimeOrNow::Now => SetAttrTime::Now,
        TimeOrNow::SpecificTime(t) => SetAttrTime::Specific(t),
    }
}

fn file_type_of(dirent_type: u32) -> FileType {
    if dirent_type == libc::DT_DIR as u32 {
        FileType::Directory
    } else {
        FileType::RegularFile
    }
}

/// The kernel-facing half of a mount.
pub struct FuseSession<F: FuseOps> {
    fs: Arc<F>,
    runtime: Handle,
    closed: Arc<Notify>,
}

impl<F: FuseOps> FuseSession<F> {
    pub fn new(fs: Arc<F>, runtime: Handle) -> Self {
        Self {
            fs,
            runtime,
            closed: Arc::new(Notify::new()),
        }
    }
}

impl<F: FuseOps> fuser::Filesystem for FuseSession<F> {
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), libc::c_int> {
        let mut conn = FuseConnInfo::default();
        self.runtime.block_on(self.fs.init(&mut conn))?;
        if conn.max_write > 0 {
            if let Err(nearest) = config.set_max_write(conn.max_write) {
                warn!(requested = conn.max_write, nearest, "kernel rejected max_write");
            }
        }
        if conn.max_readahead > 0 {
            if let Err(nearest) = config.set_max_readahead(conn.max_readahead) {
                warn!(requested = conn.max_readahead, nearest, "kernel rejected max_readahead");
            }
        }
        Ok(())
    }

    fn destroy(&mut self) {
        self.runtime.block_on(self.fs.destroy());
        self.closed.notify_one();
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str().map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let ctx = request_context(req);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.lookup(ctx, parent, &name).await {
                Ok(r) => reply.entry(
                    &r.entry.entry_timeout,
                    &to_fuser_attr(&r.entry.attr),
                    r.entry.generation,
                ),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        let fs = self.fs.clone();
        self.runtime.spawn(async move { fs.forget(ino, nlookup).await });
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        let ctx = request_context(req);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.getattr(ctx, ino, fh).await {
                Ok(r) => reply.attr(&r.attr_timeout, &to_fuser_attr(&r.attr)),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let attrs = SetAttrValues {
            mode,
            uid,
            gid,
            size,
            atime: atime.map(to_set_attr_time),
            mtime: mtime.map(to_set_attr_time),
        };
        let ctx = request_context(req);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.setattr(ctx, ino, &attrs, fh).await {
                Ok(r) => reply.attr(&r.attr_timeout, &to_fuser_attr(&r.attr)),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn unlink(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str().map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let ctx = request_context(req);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.unlink(ctx, parent, &name).await {
                Ok(()) => reply.ok(),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let ctx = request_context(req);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.open(ctx, ino, flags).await {
                Ok(r) => reply.opened(r.fh, r.flags),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn read(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let ctx = request_context(req);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.read(ctx, ino, fh, offset, size).await {
                Ok(r) => reply.data(&r.data),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn write(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let data = data.to_vec();
        let ctx = request_context(req);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.write(ctx, ino, fh, offset, &data, flags).await {
                Ok(r) => reply.written(r.written),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn flush(&mut self, req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let ctx = request_context(req);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.flush(ctx, ino, fh).await {
                Ok(()) => reply.ok(),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn release(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let ctx = request_context(req);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.release(ctx, ino, fh, flags).await {
                Ok(()) => reply.ok(),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn fsync(&mut self, req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        let ctx = request_context(req);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.fsync(ctx, ino, fh, datasync).await {
                Ok(()) => reply.ok(),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn opendir(&mut self, req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let ctx = request_context(req);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.opendir(ctx, ino).await {
                Ok(r) => reply.opened(r.fh, r.flags),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let ctx = request_context(req);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.readdir(ctx, ino, fh, offset).await {
                Ok(r) => {
                    for entry in r.entries {
                        // true once the kernel buffer is full; the rest is
                        // fetched again from the returned offset
                        let kind = file_type_of(entry.file_type);
                        if reply.add(entry.ino, entry.offset, kind, &entry.name) {
                            break;
                        }
                    }
                    reply.ok();
                }
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn releasedir(&mut self, req: &Request<'_>, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        let ctx = request_context(req);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.releasedir(ctx, ino, fh).await {
                Ok(()) => reply.ok(),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn statfs(&mut self, req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let ctx = request_context(req);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.statfs(ctx, ino).await {
                Ok(r) => {
                    let st = r.stat;
                    reply.statfs(
                        st.blocks,
                        st.bfree,
                        st.bavail,
                        st.files,
                        st.ffree,
                        st.bsize as u32,
                        st.namelen,
                        st.bsize as u32,
                    );
                }
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name) = name.to_str().map(str::to_string) else {
            reply.error(libc::EINVAL);
            return;
        };
        let ctx = request_context(req);
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match fs.create(ctx, parent, &name, mode, flags).await {
                Ok(r) => reply.created(
                    &r.entry.entry_timeout,
                    &to_fuser_attr(&r.entry.attr),
                    r.entry.generation,
                    r.fh,
                    r.flags,
                ),
                Err(errno) => reply.error(errno),
            }
        });
    }
}

/// Kernel mount options for `config`.
pub fn mount_options(config: &FuseConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(config.fs_name.clone()),
        MountOption::Subtype(SUBTYPE.to_string()),
    ];
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    if config.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    if config.readonly {
        options.push(MountOption::RO);
    }
    options.extend(
        config
            .mount_options
            .iter()
            .filter(|o| !o.is_empty())
            .map(|o| MountOption::CUSTOM(o.clone())),
    );
    options
}

/// A live mount. Dropping it unmounts.
pub struct MountedSession {
    session: BackgroundSession,
    closed: Arc<Notify>,
    mountpoint: String,
}

impl MountedSession {
    pub fn mountpoint(&self) -> &str {
        &self.mountpoint
    }

    /// Resolves once the kernel ends the session, e.g. after an external
    /// `umount`.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }

    /// Unmount and wait at most `grace` for the session thread to finish.
    pub async fn unmount(self, grace: Duration) {
        let Self {
            session,
            mountpoint,
            ..
        } = self;
        info!(%mountpoint, "unmounting");
        let join = tokio::task::spawn_blocking(move || drop(session));
        if tokio::time::timeout(grace, join).await.is_err() {
            warn!(%mountpoint, ?grace, "unmount did not finish in time, try `umount {mountpoint}`");
        }
    }
}

/// Mount `fs` at `config.mountpoint` on a background session thread.
pub fn spawn_mount<F: FuseOps>(
    fs: Arc<F>,
    config: &FuseConfig,
    runtime: Handle,
) -> io::Result<MountedSession> {
    if config.mountpoint.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no mountpoint configured",
        ));
    }
    let options = mount_options(config);
    info!(mountpoint = %config.mountpoint, ?options, "mounting");
    let adapter = FuseSession::new(fs, runtime);
    let closed = adapter.closed.clone();
    let session = fuser::spawn_mount2(adapter, &config.mountpoint, &options)?;
    debug!(mountpoint = %config.mountpoint, "mounted");
    Ok(MountedSession {
        session,
        closed,
        mountpoint: config.mountpoint.clone(),
    })
}

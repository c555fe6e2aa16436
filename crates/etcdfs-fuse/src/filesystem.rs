//! The mounted filesystem.
//!
//! `EtcdFileSystem` implements [`FuseOps`] over any [`KvStore`]. It keeps no
//! node graph: every call rebuilds the node it needs from the path recorded
//! for the inode, and only open file handles hold a node (and its buffer)
//! across calls.

use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use etcdfs_kv::KvStore;
use etcdfs_types::Ownership;

use crate::config::FuseConfig;
use crate::error::FsError;
use crate::inode::{inode_of, DirHandle, FileHandle, HandleTable, InodeEntry, InodeTable};
use crate::node::{DirNode, FileNode, NodeKind};
use crate::ops::*;
use crate::path::{parent_of, ROOT};
use crate::reply::*;
use crate::types::*;

pub struct EtcdFileSystem {
    store: Arc<dyn KvStore>,
    config: ArcSwap<FuseConfig>,
    owner: Ownership,
    inodes: InodeTable,
    handles: HandleTable,
}

impl EtcdFileSystem {
    pub fn new(store: Arc<dyn KvStore>, config: FuseConfig, owner: Ownership) -> Self {
        Self {
            store,
            config: ArcSwap::from_pointee(config),
            owner,
            inodes: InodeTable::new(),
            handles: HandleTable::new(),
        }
    }

    pub fn config(&self) -> Arc<FuseConfig> {
        self.config.load_full()
    }

    /// Swap in a new configuration. Takes effect for calls that start after it.
    pub fn update_config(&self, config: FuseConfig) {
        self.config.store(Arc::new(config));
    }

    pub fn owner(&self) -> Ownership {
        self.owner
    }

    /// Number of inodes the kernel currently holds references to.
    pub fn inode_count(&self) -> usize {
        self.inodes.len()
    }

    pub fn open_file_count(&self) -> usize {
        self.handles.file_count()
    }

    pub fn open_dir_count(&self) -> usize {
        self.handles.dir_count()
    }

    fn check_readonly(&self) -> FuseResult<()> {
        if self.config.load().readonly {
            Err(FsError::ReadOnly.errno())
        } else {
            Ok(())
        }
    }

    fn check_size(&self, size: u64) -> FuseResult<()> {
        if size > self.config.load().max_file_size {
            Err(FsError::TooLarge(size).errno())
        } else {
            Ok(())
        }
    }

    fn entry(&self, ino: u64) -> FuseResult<InodeEntry> {
        self.inodes.get(ino).ok_or(libc::ENOENT)
    }

    fn dir_node(&self, ino: u64) -> FuseResult<DirNode> {
        let entry = self.entry(ino)?;
        match entry.kind {
            NodeKind::Directory => Ok(DirNode::new(self.store.clone(), entry.path)),
            NodeKind::File => Err(libc::ENOTDIR),
        }
    }

    fn file_path(&self, ino: u64) -> FuseResult<String> {
        let entry = self.entry(ino)?;
        match entry.kind {
            NodeKind::File => Ok(entry.path),
            NodeKind::Directory => Err(libc::EISDIR),
        }
    }

    fn file_handle(&self, fh: u64) -> FuseResult<FileHandle> {
        self.handles.file(fh).ok_or(libc::EBADF)
    }

    /// The node that owns `ino`'s live buffer: the given handle's, any other
    /// open handle's, or a fresh one.
    fn file_node(&self, ino: u64, path: &str, fh: Option<u64>) -> Arc<FileNode> {
        fh.and_then(|id| self.handles.file(id))
            .filter(|h| h.ino == ino)
            .or_else(|| self.handles.any_file_for(ino))
            .map(|h| h.node)
            .unwrap_or_else(|| Arc::new(FileNode::new(self.store.clone(), path)))
    }

    async fn file_size(&self, ino: u64, path: &str, fh: Option<u64>) -> Result<u64, FsError> {
        let node = self.file_node(ino, path, fh);
        node.open().await?;
        Ok(node.size().await)
    }

    /// Attributes are synthesized: fixed mode per kind, the mount owner, and
    /// "now" for every timestamp.
    fn fill_attr(&self, ino: u64, kind: NodeKind, size: u64) -> FileAttr {
        let now = SystemTime::now();
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(512),
            atime: now,
            mtime: now,
            ctime: now,
            mode: kind.mode(),
            nlink: match kind {
                NodeKind::File => 1,
                NodeKind::Directory => 2,
            },
            uid: *self.owner.uid,
            gid: *self.owner.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
        }
    }

    fn make_entry(&self, attr: FileAttr) -> FuseEntryParam {
        let config = self.config.load();
        FuseEntryParam::new(attr, config.attr_timeout(), config.entry_timeout())
    }

    fn open_flags(&self) -> u32 {
        if self.config.load().direct_io {
            FOPEN_DIRECT_IO
        } else {
            0
        }
    }
}

impl std::fmt::Debug for EtcdFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdFileSystem")
            .field("owner", &self.owner)
            .field("inodes", &self.inodes)
            .field("handles", &self.handles)
            .finish()
    }
}

#[async_trait::async_trait]
impl FuseOps for EtcdFileSystem {
    async fn init(&self, conn_info: &mut FuseConnInfo) -> FuseResult<()> {
        let config = self.config.load();
        info!(
            fs_name = %config.fs_name,
            readonly = config.readonly,
            uid = %self.owner.uid,
            gid = %self.owner.gid,
            "etcdfs init"
        );
        conn_info.max_write = MAX_WRITE;
        Ok(())
    }

    async fn destroy(&self) {
        info!(
            open_files = self.handles.file_count(),
            "etcdfs destroy"
        );
    }

    async fn lookup(
        &self,
        ctx: FuseRequestContext,
        parent: u64,
        name: &str,
    ) -> FuseResult<ReplyEntry> {
        debug!(parent, name, pid = ctx.pid, "lookup");
        let dir = self.dir_node(parent)?;
        let node = dir.lookup(name).await.map_err(|e| e.errno())?;

        let ino = node.inode();
        // A file lookup costs up to two scans in DirNode::lookup plus a full
        // get of the value for its size.
        let size = match node.kind() {
            NodeKind::File => self
                .file_size(ino, node.path(), None)
                .await
                .map_err(|e| e.errno())?,
            NodeKind::Directory => 0,
        };
        self.inodes.add_entry(node.path(), node.kind());

        let attr = self.fill_attr(ino, node.kind(), size);
        Ok(ReplyEntry {
            entry: self.make_entry(attr),
        })
    }

    async fn forget(&self, ino: u64, nlookup: u64) {
        debug!(ino, nlookup, "forget");
        self.inodes.forget(ino, nlookup);
    }

    async fn getattr(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: Option<u64>,
    ) -> FuseResult<ReplyAttr> {
        debug!(ino, pid = ctx.pid, "getattr");
        let entry = self.entry(ino)?;
        let size = match entry.kind {
            NodeKind::File => self
                .file_size(ino, &entry.path, fh)
                .await
                .map_err(|e| e.errno())?,
            NodeKind::Directory => 0,
        };
        Ok(ReplyAttr {
            attr: self.fill_attr(ino, entry.kind, size),
            attr_timeout: self.config.load().attr_timeout(),
        })
    }

    async fn setattr(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        attrs: &SetAttrValues,
        fh: Option<u64>,
    ) -> FuseResult<ReplyAttr> {
        debug!(ino, size = ?attrs.size, pid = ctx.pid, "setattr");
        if attrs.has_metadata_changes() {
            debug!(ino, "ignoring mode, owner and time changes");
        }

        let entry = self.entry(ino)?;
        let size = match (entry.kind, attrs.size) {
            (NodeKind::Directory, Some(_)) => return Err(libc::EISDIR),
            (NodeKind::Directory, None) => 0,
            (NodeKind::File, Some(size)) => {
                self.check_readonly()?;
                self.check_size(size)?;
                let node = self.file_node(ino, &entry.path, fh);
                node.set_size(size).await.map_err(|e| e.errno())?;
                size
            }
            (NodeKind::File, None) => self
                .file_size(ino, &entry.path, fh)
                .await
                .map_err(|e| e.errno())?,
        };

        Ok(ReplyAttr {
            attr: self.fill_attr(ino, entry.kind, size),
            attr_timeout: self.config.load().attr_timeout(),
        })
    }

    async fn unlink(&self, ctx: FuseRequestContext, parent: u64, name: &str) -> FuseResult<()> {
        self.check_readonly()?;
        debug!(parent, name, pid = ctx.pid, "unlink");
        let dir = self.dir_node(parent)?;
        dir.unlink(name).await.map_err(|e| e.errno())
    }

    async fn create(
        &self,
        ctx: FuseRequestContext,
        parent: u64,
        name: &str,
        mode: u32,
        flags: i32,
    ) -> FuseResult<ReplyCreate> {
        self.check_readonly()?;
        debug!(parent, name, mode, pid = ctx.pid, "create");
        let dir = self.dir_node(parent)?;
        let node = Arc::new(dir.create(name).await.map_err(|e| e.errno())?);

        let ino = self.inodes.add_entry(node.path(), NodeKind::File);
        let fh = self.handles.insert_file(FileHandle {
            ino,
            node,
            flags,
        });

        let attr = self.fill_attr(ino, NodeKind::File, 0);
        Ok(ReplyCreate {
            entry: self.make_entry(attr),
            fh,
            flags: self.open_flags(),
        })
    }

    async fn open(&self, ctx: FuseRequestContext, ino: u64, flags: i32) -> FuseResult<ReplyOpen> {
        debug!(ino, flags, pid = ctx.pid, "open");
        if OpenFlags::from_raw(flags).mutates() {
            self.check_readonly()?;
        }
        let path = self.file_path(ino)?;

        let node = Arc::new(FileNode::new(self.store.clone(), path));
        node.open().await.map_err(|e| e.errno())?;
        let fh = self.handles.insert_file(FileHandle { ino, node, flags });

        Ok(ReplyOpen {
            fh,
            flags: self.open_flags(),
        })
    }

    async fn read(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        debug!(ino, fh, offset, size, pid = ctx.pid, "read");
        let offset = u64::try_from(offset).map_err(|_| FsError::InvalidOffset(offset).errno())?;
        let handle = self.file_handle(fh)?;
        let data = handle.node.read(offset, size as usize).await;
        Ok(ReplyData { data })
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
        self.check_readonly()?;
        debug!(ino, fh, offset, size = data.len(), flags, pid = ctx.pid, "write");
        let offset = u64::try_from(offset).map_err(|_| FsError::InvalidOffset(offset).errno())?;
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| FsError::TooLarge(u64::MAX).errno())?;
        self.check_size(end)?;

        let handle = self.file_handle(fh)?;
        let written = handle.node.write(offset, data).await.map_err(|e| e.errno())?;
        Ok(ReplyWrite {
            written: written as u32,
        })
    }

    async fn flush(&self, ctx: FuseRequestContext, ino: u64, fh: u64) -> FuseResult<()> {
        debug!(ino, fh, pid = ctx.pid, "flush");
        let handle = self.file_handle(fh)?;
        handle.node.flush().await.map_err(|e| e.errno())
    }

    async fn release(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: u64,
        flags: i32,
    ) -> FuseResult<()> {
        debug!(ino, fh, flags, pid = ctx.pid, "release");
        let Some(handle) = self.handles.remove_file(fh) else {
            return Ok(());
        };
        if handle.node.is_dirty() {
            if let Err(e) = handle.node.flush().await {
                warn!(path = %handle.node.path(), error = %e, "dropping unflushed writes on release");
                return Err(e.errno());
            }
        }
        Ok(())
    }

    async fn fsync(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: u64,
        datasync: bool,
    ) -> FuseResult<()> {
        debug!(ino, fh, datasync, pid = ctx.pid, "fsync");
        let handle = self.file_handle(fh)?;
        handle.node.sync().await.map_err(|e| e.errno())
    }

    async fn opendir(&self, ctx: FuseRequestContext, ino: u64) -> FuseResult<ReplyOpen> {
        debug!(ino, pid = ctx.pid, "opendir");
        let dir = self.dir_node(ino)?;
        let limits = self.config.load().list_limits();
        let entries = dir.list_children(limits).await.map_err(|e| e.errno())?;

        let fh = self.handles.insert_dir(DirHandle {
            ino,
            path: dir.path().to_string(),
            entries: Arc::new(entries),
        });
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn readdir(
        &self,
        ctx: FuseRequestContext,
        ino: u64,
        fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory> {
        debug!(ino, fh, offset, pid = ctx.pid, "readdir");
        let offset = usize::try_from(offset).map_err(|_| FsError::InvalidOffset(offset).errno())?;
        let handle = self.handles.dir(fh).ok_or(libc::EBADF)?;

        let parent_ino = if handle.path == ROOT {
            FUSE_ROOT_ID
        } else {
            inode_of(parent_of(&handle.path))
        };
        let dots = [
            (handle.ino, NodeKind::Directory, "."),
            (parent_ino, NodeKind::Directory, ".."),
        ];
        let children = handle.entries.iter().map(|e| {
            let kind = if e.is_directory {
                NodeKind::Directory
            } else {
                NodeKind::File
            };
            (e.inode, kind, e.name.as_str())
        });

        let entries = dots
            .into_iter()
            .chain(children)
            .enumerate()
            .skip(offset)
            .map(|(idx, (ino, kind, name))| FuseDirEntry {
                ino,
                offset: (idx + 1) as i64,
                file_type: kind.dirent_type(),
                name: name.to_string(),
            })
            .collect();

        Ok(ReplyDirectory { entries })
    }

    async fn releasedir(&self, ctx: FuseRequestContext, ino: u64, fh: u64) -> FuseResult<()> {
        debug!(ino, fh, pid = ctx.pid, "releasedir");
        self.handles.remove_dir(fh);
        Ok(())
    }

    async fn statfs(&self, ctx: FuseRequestContext, ino: u64) -> FuseResult<ReplyStatFs> {
        debug!(ino, pid = ctx.pid, "statfs");
        // The store reports no capacity; advertise an empty, bottomless volume.
        Ok(ReplyStatFs {
            stat: StatFs {
                bsize: BLOCK_SIZE as u64,
                blocks: 0,
                bfree: 0,
                bavail: 0,
                files: 0,
                ffree: 0,
                namelen: NAME_MAX,
            },
        })
    }
}
